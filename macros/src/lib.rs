//! Derive macros for Stately
//!
//! This crate provides procedural macros to reduce boilerplate when declaring
//! action enums for the Stately state pipeline.
//!
//! # Available Macros
//!
//! - `#[derive(Action)]` - Implements `stately_core::action::Action` for an enum
//!
//! # Example
//!
//! ```ignore
//! use stately_macros::Action;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Action, Clone, Debug, Serialize, Deserialize)]
//! #[serde(tag = "type", content = "payload")]
//! enum TodoAction {
//!     #[command]
//!     #[serde(rename = "[Todo Page] Create Todo")]
//!     CreateTodo { title: String },
//!
//!     #[event]
//!     #[serde(rename = "[Todo API] Todo Created")]
//!     TodoCreated { id: String, title: String },
//! }
//!
//! // Generated items:
//! assert_eq!(TodoAction::CREATE_TODO, "[Todo Page] Create Todo");
//! assert!(TodoAction::CreateTodo { title: "test".into() }.is_command());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use std::collections::HashMap;
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Variant, parse_macro_input};

/// Derive macro for Action enums
///
/// Implements `stately_core::action::Action` and adds one associated
/// constant per variant holding its type string.
///
/// The type string of a variant is taken from its `#[serde(rename = "...")]`
/// attribute, so the discriminator used for dispatch and the one used on the
/// wire are always the same. Without a rename the variant name is used.
///
/// # Attributes
///
/// - `#[command]` - Mark a variant as a command (an intent)
/// - `#[event]` - Mark a variant as an event (a completion)
///
/// # Errors
///
/// This macro produces a compile error if:
/// - Applied to a non-enum type or an enum without variants
/// - A variant has both `#[command]` and `#[event]` attributes
/// - A type string is empty
/// - Two variants share the same type string
///
/// # Example
///
/// ```ignore
/// #[derive(Action, Clone, Debug)]
/// enum OrderAction {
///     #[command]
///     PlaceOrder { customer_id: String },
///
///     #[event]
///     OrderPlaced { order_id: String },
/// }
///
/// let action = OrderAction::PlaceOrder { customer_id: "cust-1".into() };
/// assert_eq!(action.action_type(), "PlaceOrder");
/// assert!(action.is_command());
/// assert!(!action.is_event());
/// ```
#[proc_macro_derive(Action, attributes(command, event))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_action(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

struct ActionVariant<'a> {
    variant: &'a Variant,
    type_name: String,
    is_command: bool,
    is_event: bool,
}

fn expand_action(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return Err(syn::Error::new_spanned(
            input,
            "#[derive(Action)] can only be used on enums",
        ));
    };

    if data_enum.variants.is_empty() {
        return Err(syn::Error::new_spanned(
            input,
            "#[derive(Action)] requires at least one variant",
        ));
    }

    let mut variants = Vec::with_capacity(data_enum.variants.len());
    let mut seen: HashMap<String, &Ident> = HashMap::new();

    for variant in &data_enum.variants {
        let is_command = has_attribute(&variant.attrs, "command");
        let is_event = has_attribute(&variant.attrs, "event");

        if is_command && is_event {
            return Err(syn::Error::new_spanned(
                variant,
                "Variant cannot be both #[command] and #[event]",
            ));
        }

        let type_name = serde_rename(&variant.attrs)?.unwrap_or_else(|| variant.ident.to_string());

        if type_name.trim().is_empty() {
            return Err(syn::Error::new_spanned(
                variant,
                "Action type string must not be empty",
            ));
        }

        if let Some(previous) = seen.insert(type_name.clone(), &variant.ident) {
            return Err(syn::Error::new_spanned(
                variant,
                format!("Action type `{type_name}` is already used by variant `{previous}`"),
            ));
        }

        variants.push(ActionVariant {
            variant,
            type_name,
            is_command,
            is_event,
        });
    }

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_consts = variants.iter().map(|entry| {
        let const_name = Ident::new(&screaming_snake(&entry.variant.ident.to_string()), Span::call_site());
        let type_name = &entry.type_name;
        let doc = format!("Type string of [`{name}::{}`]", entry.variant.ident);
        quote! {
            #[doc = #doc]
            pub const #const_name: &'static str = #type_name;
        }
    });

    let type_names = variants.iter().map(|entry| &entry.type_name);

    let action_type_arms = variants.iter().map(|entry| {
        let pattern = variant_pattern(entry.variant);
        let type_name = &entry.type_name;
        quote! { #pattern => #type_name, }
    });

    let is_command_body = flag_body(variants.iter().filter(|entry| entry.is_command));
    let is_event_body = flag_body(variants.iter().filter(|entry| entry.is_event));

    Ok(quote! {
        impl #impl_generics #name #ty_generics #where_clause {
            #(#type_consts)*
        }

        impl #impl_generics ::stately_core::action::Action for #name #ty_generics #where_clause {
            const ACTION_TYPES: &'static [&'static str] = &[#(#type_names),*];

            fn action_type(&self) -> &'static str {
                match self {
                    #(#action_type_arms)*
                }
            }

            fn is_command(&self) -> bool {
                #is_command_body
            }

            fn is_event(&self) -> bool {
                #is_event_body
            }
        }
    })
}

fn flag_body<'a, 'b: 'a>(mut entries: impl Iterator<Item = &'a ActionVariant<'b>>) -> TokenStream2 {
    let Some(first) = entries.next() else {
        return quote! { false };
    };

    let first = variant_pattern(first.variant);
    let rest = entries.map(|entry| variant_pattern(entry.variant));
    quote! { matches!(self, #first #(| #rest)*) }
}

fn variant_pattern(variant: &Variant) -> TokenStream2 {
    let ident = &variant.ident;
    match &variant.fields {
        Fields::Named(_) => quote! { Self::#ident { .. } },
        Fields::Unnamed(_) => quote! { Self::#ident(..) },
        Fields::Unit => quote! { Self::#ident },
    }
}

/// Helper function to check if an attribute list contains a specific attribute
fn has_attribute(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}

/// Reads `rename = "..."` from the variant's `#[serde(...)]` attributes.
fn serde_rename(attrs: &[Attribute]) -> syn::Result<Option<String>> {
    let mut rename = None;

    for attr in attrs.iter().filter(|attr| attr.path().is_ident("serde")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") && meta.input.peek(syn::Token![=]) {
                let value: LitStr = meta.value()?.parse()?;
                rename = Some(value.value());
            } else if meta.input.peek(syn::Token![=]) {
                meta.value()?.parse::<syn::Expr>()?;
            } else if meta.input.peek(syn::token::Paren) {
                let content;
                syn::parenthesized!(content in meta.input);
                content.parse::<TokenStream2>()?;
            }
            Ok(())
        })?;
    }

    Ok(rename)
}

/// `BooksLoadedSuccess` -> `BOOKS_LOADED_SUCCESS`
fn screaming_snake(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    let chars: Vec<char> = ident.chars().collect();

    for (index, ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && index > 0 {
            let prev = chars[index - 1];
            let next_is_lower = chars.get(index + 1).is_some_and(|c| c.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower) {
                out.push('_');
            }
        }
        out.extend(ch.to_uppercase());
    }

    out
}
