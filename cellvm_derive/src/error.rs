//! `#[derive(Error)]`.
//!
//! ```ignore
//! use cellvm_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum StoreError {
//!     #[error("invalid address {address}")]
//!     InvalidAddress { address: u64 },
//!     #[error("corrupted cell {0}")]
//!     Corrupted(u64),
//!     #[error("store closed")]
//!     Closed,
//! }
//! ```
//!
//! Positional placeholders (`{0}`) are rewritten to the generated bindings
//! (`{f0}`); named placeholders refer to struct fields directly.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Lit, Meta, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let message = message(&variant.attrs, &variant.ident)?;
                    let ident = &variant.ident;
                    Ok(display_arm(quote! { Self::#ident }, &variant.fields, &message))
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message = message(&input.attrs, &input.ident)?;
            let arm = display_arm(quote! { Self }, &data.fields, &message);
            quote! {
                match self {
                    #arm
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// One `match` arm writing `message` with the fields of `path` in scope.
fn display_arm(path: TokenStream2, fields: &Fields, message: &str) -> TokenStream2 {
    match fields {
        Fields::Unit => quote! {
            #path => write!(f, #message),
        },
        Fields::Named(named) => {
            let names: Vec<_> = named.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            quote! {
                #[allow(unused_variables)]
                #path { #(#names),* } => write!(f, #message),
            }
        }
        Fields::Unnamed(unnamed) => {
            let count = unnamed.unnamed.len();
            let names: Vec<_> = (0..count).map(|i| format_ident!("f{}", i)).collect();
            let message = positional_to_named(message, count);
            quote! {
                #[allow(unused_variables)]
                #path ( #(#names),* ) => write!(f, #message),
            }
        }
    }
}

/// Reads the string literal out of `#[error("...")]`.
fn message<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<String> {
    let Some(attr) = attrs.iter().find(|a| a.path().is_ident("error")) else {
        return Err(syn::Error::new_spanned(
            target,
            "missing #[error(\"...\")] attribute",
        ));
    };
    let Meta::List(list) = &attr.meta else {
        return Err(syn::Error::new_spanned(
            &attr.meta,
            "expected #[error(\"message\")]",
        ));
    };
    match syn::parse2::<Lit>(list.tokens.clone()) {
        Ok(Lit::Str(lit)) => Ok(lit.value()),
        _ => Err(syn::Error::new_spanned(
            &attr.meta,
            "#[error] message must be a string literal",
        )),
    }
}

/// Rewrites `{0}`, `{1:?}`, ... to `{f0}`, `{f1:?}`, ...
fn positional_to_named(message: &str, count: usize) -> String {
    let mut out = message.to_string();
    for i in (0..count).rev() {
        out = out
            .replace(&format!("{{{i}}}"), &format!("{{f{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{f{i}:"));
    }
    out
}
