use aliri_braid::braid;
use std::fmt;

/// Hides a secret behind a label unless formatted with `{:#}`/`{:#?}`
///
/// Alternate `Debug` shows a quoted prefix, capped by the format width or by
/// `debug_chars`. Alternate `Display` shows the whole value unless a width
/// is given.
macro_rules! redacted {
    ($ty:ty, label = $label:literal, debug_chars = $chars:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                let max_chars = f.width().unwrap_or($chars);
                f.write_str("\"")?;
                write_prefix(f, self.as_str(), max_chars)?;
                f.write_str("\"")
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if !f.alternate() {
                    return f.write_str(concat!("***", $label, "***"));
                }
                match f.width() {
                    Some(max_chars) => write_prefix(f, self.as_str(), max_chars),
                    None => f.write_str(self.as_str()),
                }
            }
        }
    };
}

/// Writes at most `max_chars` characters of `value`, the last being `…` when
/// the value is cut short
fn write_prefix(f: &mut fmt::Formatter, value: &str, max_chars: usize) -> fmt::Result {
    if max_chars <= 1 {
        return f.write_str("…");
    }
    let mut boundaries = value.char_indices().map(|(idx, _)| idx);
    match (boundaries.nth(max_chars - 1), boundaries.next()) {
        (Some(cut), Some(_)) => {
            f.write_str(&value[..cut])?;
            f.write_str("…")
        }
        _ => f.write_str(value),
    }
}

/// A client ID
#[braid(serde)]
pub struct ClientId;

/// A client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

redacted!(ClientSecretRef, label = "CLIENT SECRET", debug_chars = 5);

/// An access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

redacted!(AccessTokenRef, label = "ACCESS TOKEN", debug_chars = 15);

/// The audience a token is requested for
#[braid(serde)]
pub struct Audience;

/// A single OAuth2 scope
#[braid(serde)]
pub struct Scope;
