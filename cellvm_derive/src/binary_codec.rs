//! `#[derive(BinaryCodec)]`.
//!
//! Structs encode their fields in declaration order. Enums write a `u8`
//! discriminant first (explicit `= N` values are honored, otherwise the
//! previous discriminant plus one), then the variant's fields. Unions are
//! rejected.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DataEnum, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (encode_body, decode_body) = match &input.data {
        Data::Struct(data) => struct_bodies(&data.fields),
        Data::Enum(data) => match enum_bodies(data) {
            Ok(bodies) => bodies,
            Err(err) => return err.to_compile_error().into(),
        },
        Data::Union(_) => {
            return syn::Error::new_spanned(&input, "BinaryCodec cannot be derived for unions")
                .to_compile_error()
                .into();
        }
    };

    quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(input: &mut &[u8]) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    }
    .into()
}

/// Binding identifiers for a field list: the field names for named fields,
/// `f0, f1, ...` for positional ones.
fn bindings(fields: &Fields) -> Vec<syn::Ident> {
    match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .filter_map(|f| f.ident.clone())
            .collect(),
        Fields::Unnamed(unnamed) => (0..unnamed.unnamed.len())
            .map(|i| format_ident!("f{}", i))
            .collect(),
        Fields::Unit => Vec::new(),
    }
}

/// Destructuring pattern (`{ a, b }`, `(f0, f1)` or nothing) for a field list.
fn pattern(fields: &Fields, names: &[syn::Ident]) -> TokenStream2 {
    match fields {
        Fields::Named(_) => quote! { { #(#names),* } },
        Fields::Unnamed(_) => quote! { ( #(#names),* ) },
        Fields::Unit => quote! {},
    }
}

/// Constructor tail that decodes every field in order.
fn decode_tail(fields: &Fields, names: &[syn::Ident]) -> TokenStream2 {
    let decode = quote! { crate::types::encoding::Decode::decode(input)? };
    match fields {
        Fields::Named(_) => quote! { { #(#names: #decode,)* } },
        Fields::Unnamed(_) => {
            let each = names.iter().map(|_| &decode);
            quote! { ( #(#each,)* ) }
        }
        Fields::Unit => quote! {},
    }
}

fn struct_bodies(fields: &Fields) -> (TokenStream2, TokenStream2) {
    let names = bindings(fields);
    let pat = pattern(fields, &names);
    let tail = decode_tail(fields, &names);
    let encode = quote! {
        let Self #pat = self;
        #( crate::types::encoding::Encode::encode(#names, out); )*
    };
    let decode = quote! { Ok(Self #tail) };
    (encode, decode)
}

fn enum_bodies(data: &DataEnum) -> syn::Result<(TokenStream2, TokenStream2)> {
    let mut encode_arms = Vec::with_capacity(data.variants.len());
    let mut decode_arms = Vec::with_capacity(data.variants.len());
    let mut next: u8 = 0;

    for variant in &data.variants {
        let tag = match &variant.discriminant {
            Some((_, expr)) => explicit_discriminant(expr)?,
            None => next,
        };
        next = tag.wrapping_add(1);

        let ident = &variant.ident;
        let names = bindings(&variant.fields);
        let pat = pattern(&variant.fields, &names);
        let tail = decode_tail(&variant.fields, &names);

        encode_arms.push(quote! {
            Self::#ident #pat => {
                crate::types::encoding::Encode::encode(&#tag, out);
                #( crate::types::encoding::Encode::encode(#names, out); )*
            }
        });
        decode_arms.push(quote! {
            #tag => Ok(Self::#ident #tail),
        });
    }

    let encode = quote! {
        match self {
            #(#encode_arms)*
        }
    };
    let decode = quote! {
        let tag: u8 = crate::types::encoding::Decode::decode(input)?;
        match tag {
            #(#decode_arms)*
            _ => Err(crate::types::encoding::DecodeError::InvalidValue),
        }
    };
    Ok((encode, decode))
}

fn explicit_discriminant(expr: &syn::Expr) -> syn::Result<u8> {
    if let syn::Expr::Lit(syn::ExprLit {
        lit: syn::Lit::Int(int),
        ..
    }) = expr
    {
        return int.base10_parse::<u8>();
    }
    Err(syn::Error::new_spanned(
        expr,
        "BinaryCodec discriminants must be integer literals that fit in a u8",
    ))
}
