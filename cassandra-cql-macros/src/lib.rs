//! Proc macros for `cassandra-cql`.
use proc_macro::TokenStream;
use syn::DeriveInput;

mod from_row;
mod decode;

macro_rules! error {
    ($($tt:tt)*) => {
        return Err(syn::Error::new(proc_macro2::Span::call_site(), format!($($tt)*)))
    };
}
pub(crate) use error;

/// Derive [`FromRow`](../cassandra_cql/row/trait.FromRow.html) for a struct whose fields
/// each implement `Decode`.
///
/// Named-field structs bind by column name; tuple structs bind positionally.
#[proc_macro_derive(FromRow)]
pub fn from_row(input: TokenStream) -> TokenStream {
    match from_row::from_row(syn::parse_macro_input!(input as DeriveInput)) {
        Ok(ok) => ok,
        Err(err) => err.into_compile_error().into(),
    }
}

/// Derive [`Decode`](../cassandra_cql/row/trait.Decode.html) for a single-field newtype
/// struct, delegating to the inner field's `Decode` implementation.
#[proc_macro_derive(Decode)]
pub fn decode(input: TokenStream) -> TokenStream {
    match decode::decode(syn::parse_macro_input!(input as DeriveInput)) {
        Ok(ok) => ok,
        Err(err) => err.into_compile_error().into(),
    }
}
