use proc_macro2::{Span, TokenStream};
use quote::{quote, quote_spanned};
use syn::parse::Parser;

use crate::parse::*;

type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

const KNOBS: &str = "`max_workers`, `idle_timeout_ms`";

#[derive(Default)]
struct FinalConfig {
    max_workers: Option<u64>,
    idle_timeout_ms: Option<u64>,
}

struct ConfigBuilder {
    config: FinalConfig,
    is_test: bool,
}

impl ConfigBuilder {
    fn new(is_test: bool) -> Self {
        ConfigBuilder {
            config: FinalConfig::default(),
            is_test,
        }
    }

    fn macro_name(&self) -> &'static str {
        if self.is_test {
            "taskolo::test"
        } else {
            "taskolo::main"
        }
    }

    fn set_positive(
        slot: &mut Option<u64>,
        lit: syn::Lit,
        span: Span,
        field: &str,
    ) -> Result<(), syn::Error> {
        if slot.is_some() {
            return Err(syn::Error::new(span, format!("`{field}` set multiple times.")));
        }

        let val = parse_int(lit, span, field)?;
        if val == 0 {
            return Err(syn::Error::new(span, format!("`{field}` may not be 0.")));
        }

        *slot = Some(val);
        Ok(())
    }

    fn apply(&mut self, arg: syn::Meta) -> Result<(), syn::Error> {
        let namevalue = match arg {
            syn::Meta::NameValue(namevalue) => namevalue,
            syn::Meta::Path(path) => {
                let msg = format!(
                    "The `{}` attribute of #[{}] requires a value.",
                    quote!(#path),
                    self.macro_name()
                );
                return Err(syn::Error::new_spanned(path, msg));
            }
            other => {
                return Err(syn::Error::new_spanned(other, "Unknown attribute inside the macro"));
            }
        };

        let ident = namevalue
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new_spanned(&namevalue, "Must have specified ident"))?
            .to_string();

        let syn::Expr::Lit(syn::ExprLit { lit, .. }) = &namevalue.value else {
            return Err(syn::Error::new_spanned(&namevalue.value, "Must be a literal"));
        };
        let span = syn::spanned::Spanned::span(lit);

        match ident.as_str() {
            "max_workers" => {
                Self::set_positive(&mut self.config.max_workers, lit.clone(), span, "max_workers")
            }
            "idle_timeout_ms" => Self::set_positive(
                &mut self.config.idle_timeout_ms,
                lit.clone(),
                span,
                "idle_timeout_ms",
            ),
            name => Err(syn::Error::new_spanned(
                &namevalue,
                format!("Unknown attribute {name} is specified; expected one of: {KNOBS}"),
            )),
        }
    }
}

fn build_config(input: &ItemFn, args: AttributeArgs, is_test: bool) -> Result<FinalConfig, syn::Error> {
    if let Some(asyncness) = input.sig.asyncness {
        let msg = "the runtime drives synchronous closures, remove the `async` keyword";
        return Err(syn::Error::new_spanned(asyncness, msg));
    }

    let mut builder = ConfigBuilder::new(is_test);
    for arg in args {
        builder.apply(arg)?;
    }

    Ok(builder.config)
}

/// Expands
///
/// ```ignore
/// #[taskolo::main(max_workers = 2)]
/// fn main() -> anyhow::Result<()> { ... }
/// ```
///
/// into a `main` that builds a runtime and passes the original body to
/// `Runtime::block_on` as a closure.
pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if input.sig.ident == "main" && !input.sig.inputs.is_empty() {
        let msg = "the main function cannot accept arguments";
        Err(syn::Error::new_spanned(&input.sig.ident, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, false))
    };

    // Expand even on error so IDE completions keep working.
    match config {
        Ok(config) => expand(input, false, config),
        Err(e) => token_stream_with_error(expand(input, false, FinalConfig::default()), e),
    }
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    let input: ItemFn = match syn::parse2(item.clone()) {
        Ok(it) => it,
        Err(e) => return token_stream_with_error(item, e),
    };

    let config = if let Some(attr) = input.attrs().find(|attr| is_test_attribute(attr)) {
        let msg = "second test attribute is supplied, consider removing or changing the order of your test attributes";
        Err(syn::Error::new_spanned(attr, msg))
    } else {
        AttributeArgs::parse_terminated
            .parse2(args)
            .and_then(|args| build_config(&input, args, true))
    };

    match config {
        Ok(config) => expand(input, true, config),
        Err(e) => token_stream_with_error(expand(input, true, FinalConfig::default()), e),
    }
}

fn expand(mut input: ItemFn, is_test: bool, config: FinalConfig) -> TokenStream {
    input.sig.asyncness = None;

    // Type mismatches get reported on the last statement.
    let (last_stmt_start_span, last_stmt_end_span) = {
        let mut last_stmt = input.stmts.last().cloned().unwrap_or_default().into_iter();
        let start = last_stmt.next().map_or_else(Span::call_site, |t| t.span());
        let end = last_stmt.last().map_or(start, |t| t.span());
        (start, end)
    };

    let mut rt = quote_spanned! {last_stmt_start_span=>
        taskolo::runtime::Builder::new()
    };

    if let Some(n) = config.max_workers {
        let n = n as usize;
        rt = quote_spanned! {last_stmt_start_span=> #rt.max_workers(#n) };
    }

    if let Some(ms) = config.idle_timeout_ms {
        rt = quote_spanned! {last_stmt_start_span=>
            #rt.idle_timeout(::std::time::Duration::from_millis(#ms))
        };
    }

    let generated_attrs = if is_test {
        quote! { #[::core::prelude::v1::test] }
    } else {
        quote! {}
    };

    let output_type = match &input.sig.output {
        syn::ReturnType::Default => quote! { () },
        syn::ReturnType::Type(_, ret_type) => quote! { #ret_type },
    };

    let body = input.body();
    let body = quote! {
        let body = || -> #output_type #body;
    };

    let tail = quote_spanned! {last_stmt_end_span=>
        #[allow(clippy::expect_used, clippy::needless_return)]
        {
            return #rt
                .try_build()
                .expect("Failed building the Runtime")
                .block_on(body);
        }
    };

    input.into_tokens(generated_attrs, body, tail)
}
