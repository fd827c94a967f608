use comfy_table::Table;

use tally_core::config::HarnessConfig;

use crate::common::open_directory;

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Also print each account's public key
    #[arg(long)]
    keys: bool,
}

pub fn run(config: &HarnessConfig, args: &Args) -> miette::Result<()> {
    let directory = open_directory(config)?;

    let mut table = Table::new();

    if args.keys {
        table.set_header(vec!["#", "account", "role", "public key"]);
    } else {
        table.set_header(vec!["#", "account", "role"]);
    }

    for (index, account) in directory.iter().enumerate() {
        let mut row = vec![
            (index + 1).to_string(),
            account.id.to_string(),
            format!("{:?}", account.role).to_lowercase(),
        ];

        if args.keys {
            row.push(account.public_key().to_string());
        }

        table.add_row(row);
    }

    println!("{table}");

    Ok(())
}
