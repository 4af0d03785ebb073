use darling::ast::Data;
use darling::{FromDeriveInput, FromVariant};
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

use proc_macro::TokenStream;

#[derive(FromVariant)]
#[darling(attributes(named))]
struct NamedVariant {
    ident: syn::Ident,
    rename: Option<String>,
}

#[derive(FromDeriveInput)]
#[darling(attributes(named), supports(enum_unit))]
struct NamedEnum {
    ident: syn::Ident,
    data: Data<NamedVariant, ()>,
    rename_all: Option<String>,
}

fn snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 8);
    let chars: Vec<char> = ident.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let after_lower = i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let before_lower = i > 0 && chars[i - 1].is_ascii_uppercase() && chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if after_lower || before_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Derives `crate::result::Named` and `Display` for a unit-only enum.
///
/// Each variant is displayed as its identifier unless it carries
/// `#[named(rename = "...")]`. `#[named(rename_all = "snake_case")]` on the
/// enum converts every identifier that is not renamed.
#[proc_macro_derive(Named, attributes(named))]
pub fn derive_named(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let parsed = match NamedEnum::from_derive_input(&input) {
        Ok(v) => v,
        Err(e) => return TokenStream::from(e.write_errors()),
    };

    let snake = match parsed.rename_all.as_deref() {
        None => false,
        Some("snake_case") => true,
        Some(other) => {
            return syn::Error::new_spanned(&input.ident, format!("unsupported rename_all = \"{other}\""))
                .to_compile_error()
                .into();
        }
    };

    let name = parsed.ident;
    let variants = parsed
        .data
        .take_enum()
        .expect("Named is restricted to enums by darling");

    let arms = variants.iter().map(|v| {
        let ident = &v.ident;
        let label = match &v.rename {
            Some(rename) => rename.clone(),
            None if snake => snake_case(&ident.to_string()),
            None => ident.to_string(),
        };
        quote! { Self::#ident => #label, }
    });

    let expanded = quote! {
        impl crate::result::Named for #name {
            fn name(&self) -> &'static str {
                match self {
                    #( #arms )*
                }
            }
        }

        impl ::core::fmt::Display for #name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(crate::result::Named::name(self))
            }
        }
    };

    TokenStream::from(expanded)
}
