//! Prompts for document extraction and JSON reconciliation.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing what the model is asked to do
//!    requires editing exactly one place.
//!
//! 2. **Testability**: unit tests can inspect the exact message text that
//!    goes on the wire without a live provider.
//!
//! Callers can override the extraction and reconciliation prompts via
//! [`crate::config::PipelineConfig`]; the constants here are used only when
//! no override is provided. The verification prompt is fixed.

/// Default system instruction for turning document page images into JSON.
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are an expert financial document analyst. You receive images of financial documents such as bank statements, invoices, receipts, payroll slips and account summaries. Your task is to extract their content as structured JSON.

Follow these rules precisely:

1. COVERAGE
   - Extract every document shown, in the order the images are given
   - Pages belonging to the same document must be merged into one object

2. FIELDS
   - Capture issuer, recipient, account identifiers, dates, currency and totals when present
   - Capture line items and transactions as arrays of objects, keeping their original order
   - Use the labels printed on the document as keys when no obvious standard name exists

3. VALUES
   - Dates as ISO 8601 (YYYY-MM-DD) when the day can be determined
   - Amounts as JSON numbers without currency symbols or thousands separators
   - Use null for fields that are present but unreadable; omit fields that do not exist

4. OUTPUT FORMAT
   - Output ONLY the JSON document
   - Do NOT wrap it in ```json fences
   - Do NOT add commentary or explanations"#;

/// Text that precedes the images in the extraction user message.
pub const EXTRACTION_PREAMBLE: &str = "Please analyze these documents and convert them to JSON:";

/// Default instruction prompt for the reconciliation pass.
///
/// Editable by the admin through [`crate::settings::SettingsController`].
pub const DEFAULT_RECONCILIATION_PROMPT: &str = "You are given several JSON documents extracted from related financial documents. Reconcile them into a single JSON object: match transactions that refer to the same movement, flag amounts that disagree between documents, and compute the totals per account. Reply only with the resulting JSON. The JSON documents are:";

/// Verification prompt sent as the second reconciliation request.
/// The wording (Spanish) and whitespace are part of the wire contract.
const VERIFICATION_PROMPT: &str = "por favor verifica si el json es correcto. en caso de que si retornarlo tal como esta en caso contrario ajustarlo correctamente. Si el mismo tiene operaciones a realizar (ejemplo 2 + 5), realizalas. \nEs importante que solo me respondas con el json final\nAqui te dejo el json a validar:\n\n";

/// Separator between the verification prompt and the first-pass text.
const VERIFICATION_JOINER: &str = " \n Aqui tienes los jsons de entrada: ";

/// Build the single user message of the first reconciliation request.
///
/// Every fragment, the last one included, is followed by `", "`; the list
/// is appended to the prompt after one space.
pub fn combination_message<S: AsRef<str>>(instruction_prompt: &str, fragments: &[S]) -> String {
    let mut message = format!("{} ", instruction_prompt);
    for fragment in fragments {
        message.push_str(fragment.as_ref());
        message.push_str(", ");
    }
    message
}

/// Build the verification request for a first-pass reconciliation result.
pub fn verification_message(first_pass: &str) -> String {
    format!("{}{}{}", VERIFICATION_PROMPT, VERIFICATION_JOINER, first_pass)
}
