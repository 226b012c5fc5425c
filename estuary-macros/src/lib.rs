//! Attribute macros for declaring Estuary transformers.
//!
//! Re-exported by the `estuary` crate under the `macros` feature; the
//! generated code refers to `::estuary` paths.

use proc_macro::TokenStream;

mod transformer;

use transformer::{Kind, transformer_impl};

/// Turn a conversion function into a transformer with the `CONVERTER`
/// capability.
///
/// The function takes the payload by reference, optionally followed by the
/// encoding, and returns `Result<U, E>` where `E: Into<BoxError>`.
///
/// Attributes: `name = "..."` (defaults to the function name),
/// `mime = "..."` and `encoding = "..."` for the return data type,
/// `accept_null = true`.
///
/// ```ignore
/// #[estuary::converter(mime = "text/plain")]
/// fn int_to_text(value: &i64) -> Result<String, std::convert::Infallible> {
///     Ok(value.to_string())
/// }
/// ```
#[proc_macro_attribute]
pub fn converter(attr: TokenStream, item: TokenStream) -> TokenStream {
    transformer_impl(attr, item, Kind::Converter)
}

/// Turn a function into a transformer.
///
/// Same shape and attributes as [`converter`](macro@converter), plus
/// `ignore_bad_input = true` to skip the transformer when the payload is
/// not accepted.
///
/// ```ignore
/// #[estuary::transformer(name = "shout", ignore_bad_input = true)]
/// fn shout(text: &String, _encoding: &str) -> Result<String, std::convert::Infallible> {
///     Ok(text.to_uppercase())
/// }
/// ```
#[proc_macro_attribute]
pub fn transformer(attr: TokenStream, item: TokenStream) -> TokenStream {
    transformer_impl(attr, item, Kind::Transformer)
}
