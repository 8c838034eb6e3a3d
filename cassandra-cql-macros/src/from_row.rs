use proc_macro::TokenStream;
use quote::quote;
use syn::*;
use crate::error;

pub fn from_row(input: DeriveInput) -> Result<TokenStream> {
    let DeriveInput { attrs: _, vis: _, ident, mut generics, data } = input;
    let Data::Struct(data) = data else {
        error!("only struct are currently supported")
    };

    let body = match data.fields {
        Fields::Unnamed(FieldsUnnamed { unnamed, .. }) => {
            let fields = (0..unnamed.len()).map(|i| quote! { row.try_get(#i)?, });

            quote! {
                Ok(Self(#(#fields)*))
            }
        },
        Fields::Named(FieldsNamed { named, .. }) => {
            let fields = named
                .iter()
                .map(|f| f.ident.as_ref().unwrap())
                .map(|id| (id.to_string(), id))
                .map(|(name, id)| quote! { #id: row.try_get(#name)?, });

            quote! {
                Ok(Self {
                    #(#fields)*
                })
            }
        }
        Fields::Unit => quote! {
            Ok(Self)
        }
    };

    for ty in generics.type_params_mut() {
        ty.bounds.push(syn::parse_quote!(::cassandra_cql::row::Decode));
    }

    let (g1, g2, g3) = generics.split_for_impl();

    Ok(quote! {
        #[automatically_derived]
        impl #g1 ::cassandra_cql::row::FromRow for #ident #g2 #g3 {
            fn from_row(row: ::cassandra_cql::row::Row) -> Result<Self, ::cassandra_cql::row::DecodeError> {
                #body
            }
        }
    }.into())
}

