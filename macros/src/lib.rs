//! Derive macros for walkin queue actions
//!
//! # Available Macros
//!
//! - `#[derive(Action)]` - Classifies the variants of an action enum as
//!   commands, events or internal feedback, and names them for logs and
//!   metric labels
//!
//! # Example
//!
//! ```ignore
//! use walkin_macros::Action;
//!
//! #[derive(Action, Clone, Debug)]
//! enum DeskAction {
//!     #[command]
//!     ClaimNext { desk_id: DeskId, lane_id: LaneId },
//!
//!     #[event]
//!     TicketClaimed { ticket_id: TicketId },
//!
//!     PersistFailed { ticket_id: TicketId, error: String },
//! }
//!
//! assert!(DeskAction::ClaimNext { .. }.is_command());
//! assert_eq!(action.name(), "claim_next");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Variant};

/// Derive macro for Action enums
///
/// Generates:
/// - `is_command()` - true for variants marked `#[command]`
/// - `is_event()` - true for variants marked `#[event]`
/// - `kind()` - `"command"`, `"event"` or `"internal"` (unmarked variants)
/// - `name()` - the variant name in `snake_case`
///
/// A variant marked both `#[command]` and `#[event]`, or use on a non-enum
/// type, is reported as a compile error.
#[proc_macro_derive(Action, attributes(command, event))]
pub fn derive_action(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let Data::Enum(data_enum) = &input.data else {
        return syn::Error::new_spanned(input, "#[derive(Action)] can only be used on enums")
            .to_compile_error()
            .into();
    };

    let mut is_command_arms = Vec::new();
    let mut is_event_arms = Vec::new();
    let mut kind_arms = Vec::new();
    let mut name_arms = Vec::new();

    for variant in &data_enum.variants {
        let is_command = has_attribute(&variant.attrs, "command");
        let is_event = has_attribute(&variant.attrs, "event");

        if is_command && is_event {
            return syn::Error::new_spanned(variant, "Variant cannot be both #[command] and #[event]")
                .to_compile_error()
                .into();
        }

        let pattern = variant_pattern(variant);
        let kind = if is_command {
            "command"
        } else if is_event {
            "event"
        } else {
            "internal"
        };
        let snake = to_snake_case(&variant.ident.to_string());

        if is_command {
            is_command_arms.push(quote! { #pattern => true, });
        }
        if is_event {
            is_event_arms.push(quote! { #pattern => true, });
        }
        kind_arms.push(quote! { #pattern => #kind, });
        name_arms.push(quote! { #pattern => #snake, });
    }

    let expanded = quote! {
        impl #name {
            /// Returns true if this action is a command
            #[must_use]
            #[allow(clippy::match_like_matches_macro, clippy::match_same_arms)]
            pub const fn is_command(&self) -> bool {
                match self {
                    #(#is_command_arms)*
                    _ => false,
                }
            }

            /// Returns true if this action is an event
            #[must_use]
            #[allow(clippy::match_like_matches_macro, clippy::match_same_arms)]
            pub const fn is_event(&self) -> bool {
                match self {
                    #(#is_event_arms)*
                    _ => false,
                }
            }

            /// Returns `"command"`, `"event"` or `"internal"`
            #[must_use]
            #[allow(clippy::match_same_arms)]
            pub const fn kind(&self) -> &'static str {
                match self {
                    #(#kind_arms)*
                }
            }

            /// Returns the variant name in `snake_case`
            #[must_use]
            pub const fn name(&self) -> &'static str {
                match self {
                    #(#name_arms)*
                }
            }
        }
    };

    TokenStream::from(expanded)
}

/// Match pattern for a variant that ignores its fields
fn variant_pattern(variant: &Variant) -> proc_macro2::TokenStream {
    let ident = &variant.ident;
    match &variant.fields {
        Fields::Named(_) => quote! { Self::#ident { .. } },
        Fields::Unnamed(_) => quote! { Self::#ident(..) },
        Fields::Unit => quote! { Self::#ident },
    }
}

/// `IssueTicket` -> `issue_ticket`
fn to_snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    for (i, ch) in ident.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn has_attribute(attrs: &[Attribute], name: &str) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident(name))
}

#[cfg(test)]
mod tests {
    use super::to_snake_case;

    #[test]
    fn snake_case_conversion() {
        assert_eq!(to_snake_case("IssueTicket"), "issue_ticket");
        assert_eq!(to_snake_case("Noop"), "noop");
        assert_eq!(to_snake_case("RecordLoginFailure"), "record_login_failure");
    }
}
