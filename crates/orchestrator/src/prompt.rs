//! System prompt assembly.
//!
//! The tenant context block is the expensive, cacheable part — it is built
//! once per tenant and shared across that tenant's sessions, with a
//! placeholder for the session id substituted per read.

use maitred_core::session::TenantSnapshot;
use maitred_core::SessionId;

pub const SESSION_ID_PLACEHOLDER: &str = "{{session_id}}";

/// Build the cacheable per-tenant context block.
pub fn tenant_context(snapshot: Option<&TenantSnapshot>) -> String {
    let mut out = String::from(
        "You are the assistant for a small-business storefront. \
         Help with bookings, availability, and questions about the business. \
         Stay on topic; politely decline anything unrelated.\n",
    );

    match snapshot {
        Some(snap) => {
            out.push_str(&format!("\nBusiness: {}\n", snap.business_name));
            if let Some(tz) = &snap.timezone {
                out.push_str(&format!("Timezone: {tz}\n"));
            }
            if !snap.services.is_empty() {
                out.push_str(&format!("Services: {}\n", snap.services.join(", ")));
            }
        }
        None => {
            out.push_str("\nNo business profile is available for this tenant yet.\n");
        }
    }

    out.push_str(&format!("\nCurrent session: {SESSION_ID_PLACEHOLDER}\n"));
    out
}

/// Finish the prompt for one turn: substitute the session id and append
/// the digest of proposal failures so the model can recover gracefully
/// instead of silently repeating the attempt.
pub fn system_prompt(
    context: &str,
    session_id: &SessionId,
    failure_digest: Option<&str>,
) -> String {
    let mut prompt = context.replace(SESSION_ID_PLACEHOLDER, session_id.as_str());
    if let Some(digest) = failure_digest {
        prompt.push_str(&format!(
            "\nNote: some confirmed actions just failed: {digest}. \
             Apologize briefly and offer an alternative; do not retry them silently.\n"
        ));
    }
    prompt
}
