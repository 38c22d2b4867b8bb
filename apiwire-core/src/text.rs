//! Text conversion for values carried in query parameters, headers, cookies
//! and path segments.
//!
//! A type gets onto the wire as a single string. [`TextValue`] is the hook:
//! implement it on a domain type to control its textual form. The crate
//! provides implementations for `String` (identity), the primitive numeric
//! types, `bool`, `char` and `Option<V>`.

use std::fmt::Display;
use std::str::FromStr;

/// Error converting a value to or from its text form.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert {input:?} as {type_name}: {reason}")]
pub struct TextError {
    pub input: String,
    pub type_name: &'static str,
    pub reason: String,
}

impl TextError {
    pub fn new(input: impl Into<String>, type_name: &'static str, reason: impl Display) -> Self {
        Self {
            input: input.into(),
            type_name,
            reason: reason.to_string(),
        }
    }
}

/// A value with a single-string wire form.
pub trait TextValue: Sized {
    /// Render the value as text.
    fn to_text(&self) -> Result<String, TextError>;

    /// Parse the value from non-empty text.
    ///
    /// Empty input never reaches this method: the codec resets the field to
    /// its default instead.
    fn from_text(text: &str) -> Result<Self, TextError>;
}

impl TextValue for String {
    fn to_text(&self) -> Result<String, TextError> {
        Ok(self.clone())
    }

    fn from_text(text: &str) -> Result<Self, TextError> {
        Ok(text.to_owned())
    }
}

impl<V: TextValue> TextValue for Option<V> {
    fn to_text(&self) -> Result<String, TextError> {
        match self {
            Some(v) => v.to_text(),
            None => Ok(String::new()),
        }
    }

    fn from_text(text: &str) -> Result<Self, TextError> {
        V::from_text(text).map(Some)
    }
}

/// Implements [`TextValue`] through `Display` and `FromStr`.
///
/// ```ignore
/// apiwire_core::text_via_display!(UserId);
/// ```
#[macro_export]
macro_rules! text_via_display {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::TextValue for $ty {
                fn to_text(&self) -> ::std::result::Result<::std::string::String, $crate::TextError> {
                    ::std::result::Result::Ok(::std::string::ToString::to_string(self))
                }

                fn from_text(text: &str) -> ::std::result::Result<Self, $crate::TextError> {
                    <$ty as ::std::str::FromStr>::from_str(text)
                        .map_err(|e| $crate::TextError::new(text, ::std::stringify!($ty), e))
                }
            }
        )*
    };
}

text_via_display!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char);

/// Parse `text` with `FromStr`, reporting failures as [`TextError`].
pub fn parse_text<V>(text: &str) -> Result<V, TextError>
where
    V: FromStr,
    V::Err: Display,
{
    text.parse::<V>()
        .map_err(|e| TextError::new(text, std::any::type_name::<V>(), e))
}
