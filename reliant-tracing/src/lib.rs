//! The `#[traced]` attribute used on registry operations.
//!
//! The annotated function opens a `reliant_common::logging::OperationGuard`
//! as its first statement. The guard emits an `enter` event straight away and
//! a `leave` event with the elapsed time when the function returns, on the
//! `reliant::operation` target. Arguments inside `instrument(..)` are
//! forwarded to `#[tracing::instrument]`.
//!
//! Crates using the attribute must depend on `reliant-common` and `tracing`.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    ItemFn, LitStr, Token,
    parse::{Parse, ParseStream},
    parse_macro_input, parse_quote,
};

mod kw {
    syn::custom_keyword!(instrument);
    syn::custom_keyword!(operation);
}

/// Parsed `#[traced(..)]` arguments.
#[derive(Default)]
struct TracedArgs {
    /// Forwarded verbatim; `Some(empty)` for a bare `instrument`.
    instrument: Option<TokenStream>,
    /// Overrides the function name in the emitted events.
    operation: Option<LitStr>,
}

impl Parse for TracedArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();

            if lookahead.peek(kw::instrument) {
                let keyword = input.parse::<kw::instrument>()?;
                if args.instrument.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `instrument`"));
                }
                args.instrument = Some(if input.peek(syn::token::Paren) {
                    let content;
                    syn::parenthesized!(content in input);
                    content.parse()?
                } else {
                    TokenStream::new()
                });
            } else if lookahead.peek(kw::operation) {
                let keyword = input.parse::<kw::operation>()?;
                if args.operation.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `operation`"));
                }
                input.parse::<Token![=]>()?;
                args.operation = Some(input.parse()?);
            } else {
                return Err(lookahead.error());
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(args)
    }
}

fn expand(args: TracedArgs, mut item: ItemFn) -> TokenStream {
    let operation = args
        .operation
        .unwrap_or_else(|| LitStr::new(&item.sig.ident.to_string(), item.sig.ident.span()));

    if let Some(fields) = args.instrument {
        item.attrs.push(parse_quote!(#[tracing::instrument(#fields)]));
    }

    item.block.stmts.insert(
        0,
        parse_quote! {
            let __operation = ::reliant_common::logging::OperationGuard::enter(#operation);
        },
    );

    quote!(#item)
}

/// Wrap a function in `enter`/`leave` trace events.
///
/// ```ignore
/// #[traced(instrument(level = tracing::Level::TRACE, skip_all), operation = "purge")]
/// pub fn purge_all(&self, sequence: &SequenceKey) -> usize { .. }
/// ```
///
/// Unknown arguments are rejected at compile time.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as TracedArgs);
    let item = parse_macro_input!(item as ItemFn);

    expand(args, item).into()
}
