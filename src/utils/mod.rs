pub mod format;
pub mod sanitize;
pub mod validate;

pub use sanitize::{escape_html, sanitize_content, truncate_chars};
pub use validate::{FeishuReceiveId, email_domain, is_valid_email};
