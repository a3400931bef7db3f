//! Test attributes that run each test on its own thread and fail it once a
//! wall-clock deadline passes, so a wedged reconnect loop or a stuck channel
//! read shows up as a failure instead of a hung test binary.
//!
//! ```ignore
//! #[test_timeout::timeout]
//! fn decodes() { /* ... */ }
//!
//! #[test_timeout::tokio_timeout_test(secs = 5, paused)]
//! async fn retries_after_delay() { /* ... */ }
//! ```
//!
//! `paused` starts the Tokio clock paused (requires `tokio/test-util` in the
//! calling crate). The deadline is then enforced on the real clock only.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ItemFn, Lit, Meta, Token};

const DEFAULT_SECS: u64 = 60;

struct Options {
    secs: u64,
    paused: bool,
}

fn parse_options(attr: TokenStream) -> syn::Result<Options> {
    let mut options = Options {
        secs: DEFAULT_SECS,
        paused: false,
    };
    if attr.is_empty() {
        return Ok(options);
    }

    // A bare integer is shorthand for `secs = N`.
    if let Ok(lit) = syn::parse::<syn::LitInt>(attr.clone()) {
        options.secs = positive(&lit)?;
        return Ok(options);
    }

    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse(attr)?;
    for meta in metas {
        match &meta {
            Meta::Path(path) if path.is_ident("paused") => options.paused = true,
            Meta::NameValue(nv) if nv.path.is_ident("secs") => match &nv.value {
                Expr::Lit(expr) => match &expr.lit {
                    Lit::Int(lit) => options.secs = positive(lit)?,
                    other => return Err(syn::Error::new_spanned(other, "secs expects an integer")),
                },
                other => return Err(syn::Error::new_spanned(other, "secs expects an integer")),
            },
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected `secs = N` or `paused`",
                ));
            }
        }
    }
    Ok(options)
}

fn positive(lit: &syn::LitInt) -> syn::Result<u64> {
    let value: u64 = lit.base10_parse()?;
    if value == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(value)
}

/// Wraps `body` so it runs on a worker thread and is reported back within
/// `secs` seconds. Panics inside the body are re-raised on the test thread.
fn guarded(attrs: Vec<Attribute>, func: &ItemFn, secs: u64, body: TokenStream2) -> TokenStream2 {
    let vis = &func.vis;
    let sig = &func.sig;
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = ::std::time::Duration::from_secs(#secs);
            let (sender, receiver) = ::std::sync::mpsc::channel();
            ::std::thread::spawn(move || {
                let outcome = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| #body));
                let _ = sender.send(outcome);
            });
            match receiver.recv_timeout(deadline) {
                Ok(Ok(value)) => value,
                Ok(Err(payload)) => ::std::panic::resume_unwind(payload),
                Err(::std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test exceeded {}s deadline", #secs)
                }
                Err(::std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread exited without reporting")
                }
            }
        }
    }
}

fn strip(attrs: Vec<Attribute>, skip: fn(&Attribute) -> bool) -> Vec<Attribute> {
    attrs.into_iter().filter(|attr| !skip(attr)).collect()
}

fn is_path(attr: &Attribute, expected: &[&str]) -> bool {
    let segments: Vec<String> = attr
        .path()
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect();
    segments == expected
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(err) => return err.to_compile_error().into(),
    };
    if func.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    func.sig.asyncness = None;

    let block = &func.block;
    let secs = options.secs;
    let builder = if options.paused {
        quote! { ::tokio::runtime::Builder::new_current_thread().enable_all().start_paused(true) }
    } else {
        quote! { ::tokio::runtime::Builder::new_current_thread().enable_all() }
    };
    // With a paused clock the runtime auto-advances through idle periods, so
    // an in-runtime timeout would fire spuriously. Rely on the thread deadline.
    let run = if options.paused {
        quote! { runtime.block_on(async move #block) }
    } else {
        quote! {
            runtime.block_on(async move {
                ::tokio::time::timeout(::std::time::Duration::from_secs(#secs), async move #block)
                    .await
                    .expect("test timed out")
            })
        }
    };
    let body = quote! {{
        let runtime = #builder.build().expect("failed to build Tokio runtime");
        #run
    }};

    let attrs = strip(std::mem::take(&mut func.attrs), |attr| {
        is_path(attr, &["tokio", "test"])
    });
    guarded(attrs, &func, secs, body).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = match parse_options(attr) {
        Ok(options) => options,
        Err(err) => return err.to_compile_error().into(),
    };
    let mut func = match syn::parse::<ItemFn>(item) {
        Ok(func) => func,
        Err(err) => return err.to_compile_error().into(),
    };
    if func.sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &func.sig.ident,
            "timeout expects a synchronous test; use tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }
    if options.paused {
        return syn::Error::new_spanned(&func.sig.ident, "`paused` only applies to async tests")
            .to_compile_error()
            .into();
    }

    let block = &func.block;
    let body = quote! { #block };
    let attrs = strip(std::mem::take(&mut func.attrs), |attr| is_path(attr, &["test"]));
    guarded(attrs, &func, options.secs, body).into()
}
