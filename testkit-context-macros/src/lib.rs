//! Procedural macros for testkit-context
//!
//! This crate provides the `#[testkit_context::test]` attribute macro for
//! writing tests that finish on other threads.
//!
//! # Example
//!
//! ```rust,ignore
//! use testkit_context::context::TestContext;
//!
//! #[testkit_context::test(timeout_ms = 5000)]
//! fn completes_from_worker(context: TestContext) {
//!     std::thread::spawn(move || context.complete_now());
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, FnArg, Ident, ItemFn, Lit, Pat, ReturnType, Token, Type,
};

/// Configuration options for the test macro.
#[derive(Default)]
struct TestConfig {
    /// Timeout in milliseconds, overriding the runner default
    timeout_ms: Option<u64>,
    /// Number of times the test runs
    repeat: Option<usize>,
}

impl Parse for TestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = TestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "timeout_ms" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Int(i) = lit {
                        config.timeout_ms = Some(i.base10_parse()?);
                    } else {
                        return Err(syn::Error::new_spanned(lit, "expected an integer"));
                    }
                }
                "repeat" => {
                    let lit: Lit = input.parse()?;
                    if let Lit::Int(i) = lit {
                        let times: usize = i.base10_parse()?;
                        if times == 0 {
                            return Err(syn::Error::new_spanned(i, "repeat must be at least 1"));
                        }
                        config.repeat = Some(times);
                    } else {
                        return Err(syn::Error::new_spanned(lit, "expected an integer"));
                    }
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// Determines if a function parameter is requesting a TestContext.
fn is_context_param(arg: &FnArg) -> bool {
    if let FnArg::Typed(pat_type) = arg {
        if let Type::Path(type_path) = &*pat_type.ty {
            if let Some(segment) = type_path.path.segments.last() {
                return segment.ident == "TestContext";
            }
        }
    }
    false
}

/// Extracts the parameter pattern from a function argument.
fn get_param_pat(arg: &FnArg) -> Option<&Pat> {
    if let FnArg::Typed(pat_type) = arg {
        Some(&pat_type.pat)
    } else {
        None
    }
}

/// Test attribute macro for tests completed through a `TestContext`.
///
/// The function runs as a single test case of the testkit-context runner.
/// If it takes a `TestContext` parameter, the test waits for that context's
/// verdict (up to the timeout) after the body returns; otherwise it passes
/// when the body returns.
///
/// # Configuration Options
///
/// - `timeout_ms = 5000` - Timeout for this test (default: 30 seconds)
/// - `repeat = 10` - Run the test several times, each with a fresh context
///
/// ```rust,ignore
/// #[testkit_context::test(timeout_ms = 1000, repeat = 3)]
/// fn flags_checkpoints(context: TestContext) {
///     let checkpoint = context.checkpoints(2);
///     for _ in 0..2 {
///         let checkpoint = checkpoint.clone();
///         std::thread::spawn(move || checkpoint.flag());
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as TestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_test(config, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_test(config: TestConfig, input: ItemFn) -> syn::Result<TokenStream2> {
    let name = &input.sig.ident;
    let body = &input.block;
    let attrs = &input.attrs;
    let vis = &input.vis;

    if input.sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "test function must not be async; complete asynchronous work through its TestContext",
        ));
    }

    if !matches!(input.sig.output, ReturnType::Default) {
        return Err(syn::Error::new_spanned(
            &input.sig.output,
            "test function must not return a value",
        ));
    }

    let mut context_param = None;
    for arg in &input.sig.inputs {
        if !is_context_param(arg) || context_param.is_some() {
            return Err(syn::Error::new_spanned(
                arg,
                "only a single `TestContext` parameter is supported",
            ));
        }
        context_param = get_param_pat(arg);
    }

    let context_init = match context_param {
        Some(pat) => quote! {
            let #pat: ::testkit_context::context::TestContext = __invocation.context();
        },
        None => quote! {},
    };

    let timeout = config.timeout_ms.map(|ms| {
        quote! { .with_timeout(::std::time::Duration::from_millis(#ms)) }
    });
    let repeat = config.repeat.map(|times| quote! { .repeat(#times) });

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis fn #name() {
            let __case = ::testkit_context::runner::TestCase::new(
                ::core::concat!(::core::module_path!(), "::", ::core::stringify!(#name)),
                |__invocation: &::testkit_context::runner::Invocation<'_>| {
                    #context_init
                    let __body = move || #body;
                    __body();
                    ::core::result::Result::Ok(())
                },
            )
            #timeout
            #repeat;
            let __config = ::testkit_context::config::RunnerConfig::default();
            ::testkit_context::runner::run_test(__case, &__config).assert_passed();
        }
    })
}
