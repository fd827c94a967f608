//! Submission of signed operations and receipt handling.
//!
//! Every helper awaits the receipt before returning; nothing here pipelines
//! submissions or retries them.

use tracing::{debug, info, instrument, warn};

use crate::{HarnessError, LedgerClient, Receipt, Record, SignedOperation};

/// Submits an operation and returns its receipt whatever the status.
///
/// Callers that expect specific failures (for instance an association that
/// may already exist) inspect the status themselves.
#[instrument(skip_all, fields(kind = %signed.operation.kind(), payer = %signed.payer))]
pub async fn execute_unchecked<C: LedgerClient>(
    client: &C,
    signed: SignedOperation,
) -> Result<Receipt, HarnessError> {
    debug!(signatures = signed.signatures.len(), "submitting operation");

    let tx = client.submit(signed).await?;
    let receipt = client.receipt(&tx).await?;

    debug!(tx = %tx, status = %receipt.status, "receipt received");

    Ok(receipt)
}

/// Submits an operation and fails with [`HarnessError::LedgerRejected`] on
/// any non-success status.
pub async fn execute<C: LedgerClient>(
    client: &C,
    signed: SignedOperation,
) -> Result<Receipt, HarnessError> {
    let operation = signed.operation.kind();
    let summary = signed.operation.summary();

    let receipt = execute_unchecked(client, signed).await?;

    if !receipt.status.is_success() {
        warn!(%operation, %summary, status = %receipt.status, "operation rejected");

        return Err(HarnessError::LedgerRejected {
            operation,
            summary,
            tx: receipt.tx,
            status: receipt.status,
        });
    }

    info!(%operation, tx = %receipt.tx, "operation confirmed");

    Ok(receipt)
}

/// Like [`execute`], returning the record instead of the receipt.
pub async fn execute_for_record<C: LedgerClient>(
    client: &C,
    signed: SignedOperation,
) -> Result<Record, HarnessError> {
    let receipt = execute(client, signed).await?;
    let record = client.record(&receipt.tx).await?;

    Ok(record)
}
