// Cosmos device app functional test harness
//
// Copyright (C) 2024 Alekos Filini
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! `#[functional_test]`: turns one scenario body into a test per device model.
//!
//! ```ignore
//! #[functional_test_wrapper::functional_test(timeout_secs = "60")]
//! async fn show_address(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
//!     ...
//! }
//! ```
//!
//! expands to a `show_address` module with one `#[tokio::test]` per model
//! (`show_address::nanos`, `show_address::stax`, ...).

use proc_macro::TokenStream;

use quote::{format_ident, quote};

use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Ident, ItemFn, LitStr, Token};

const ALL_MODELS: [(&str, &str); 5] = [
    ("nanos", "Nanos"),
    ("nanox", "Nanox"),
    ("nanosp", "Nanosp"),
    ("stax", "Stax"),
    ("flex", "Flex"),
];

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default)]
struct Attributes {
    timeout_secs: Option<u64>,
    models: Option<Vec<String>>,
}

struct SingleAttr {
    name: Ident,
    _equal: Token![=],
    value: LitStr,
}

impl Parse for SingleAttr {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        Ok(SingleAttr {
            name: input.parse()?,
            _equal: input.parse()?,
            value: input.parse()?,
        })
    }
}

impl Parse for Attributes {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut attrs = Attributes::default();
        let parsed = Punctuated::<SingleAttr, Token![,]>::parse_terminated(input)?;
        for attr in &parsed {
            match attr.name.to_string().as_str() {
                "timeout_secs" => {
                    let secs = attr.value.value().parse::<u64>().map_err(|_| {
                        syn::Error::new(attr.value.span(), "Expected a number of seconds")
                    })?;
                    attrs.timeout_secs = Some(secs);
                }
                "models" => {
                    let models = attr
                        .value
                        .value()
                        .split(',')
                        .map(|m| m.trim().to_string())
                        .collect::<Vec<_>>();
                    for m in &models {
                        if !ALL_MODELS.iter().any(|(name, _)| name == m) {
                            return Err(syn::Error::new(
                                attr.value.span(),
                                format!("Unknown model {}", m),
                            ));
                        }
                    }
                    attrs.models = Some(models);
                }
                x => {
                    return Err(syn::Error::new(
                        attr.name.span(),
                        format!("Invalid attr {}", x),
                    ))
                }
            }
        }

        Ok(attrs)
    }
}

#[proc_macro_attribute]
pub fn functional_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attrs = parse_macro_input!(attr as Attributes);

    let mut input = parse_macro_input!(item as ItemFn);
    let original_ident = input.sig.ident.clone();
    let new_ident = Ident::new(&format!("{}_inner", original_ident), original_ident.span());
    input.sig.ident = new_ident.clone();

    let original_ident_str = original_ident.to_string();
    let timeout = attrs.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);

    let tests = ALL_MODELS
        .iter()
        .filter(|(name, _)| match &attrs.models {
            Some(models) => models.iter().any(|m| m == name),
            None => true,
        })
        .map(|(name, kind)| {
            let test_ident = format_ident!("{}", name);
            let kind_ident = format_ident!("{}", kind);
            quote! {
                #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
                async fn #test_ident() -> Result<(), crate::Error> {
                    run(crate::utils::model::ModelKind::#kind_ident).await
                }
            }
        });

    let expanded = quote! {
        mod #original_ident {
            use super::*;

            #input

            async fn run(kind: crate::utils::model::ModelKind) -> Result<(), crate::Error> {
                crate::tests::INIT_LOG.call_once(|| {
                    env_logger::init();
                });

                let model = crate::utils::model::get_model(kind);
                let ctx = crate::scenarios::Context::from_env();

                match tokio::time::timeout(
                    std::time::Duration::from_secs(#timeout),
                    #new_ident(model, ctx),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(format!(
                        "Test '{}' timed out on {} after {}s",
                        #original_ident_str, model, #timeout
                    )
                    .into()),
                }
            }

            #(#tests)*
        }
    };

    TokenStream::from(expanded)
}
