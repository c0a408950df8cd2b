#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]

//! Entry point macros for the taskolo runtime.

mod entry;
mod parse;

/// Runs `main` inside a taskolo [`Runtime`].
///
/// The body runs on the calling thread through `Runtime::block_on`, so it can
/// submit tasks and wait on them. Everything it submitted is waited for
/// before `main` returns.
///
/// # Knobs
///
/// - `max_workers = N`: worker allotment of every priority class. Defaults to
///   one worker per CPU.
/// - `idle_timeout_ms = N`: how long an idle worker lingers before retiring.
///
/// # Usage
///
/// ```no_run
/// #[taskolo::main(max_workers = 2)]
/// fn main() {
///     taskolo::submit(|| println!("Hello world")).unwrap();
/// }
/// ```
///
/// Equivalent code not using `#[taskolo::main]`
///
/// ```no_run
/// fn main() {
///     taskolo::runtime::Builder::new()
///         .max_workers(2)
///         .try_build()
///         .expect("Failed building the Runtime")
///         .block_on(|| {
///             taskolo::submit(|| println!("Hello world")).unwrap();
///         })
/// }
/// ```
///
/// [`Runtime`]: ../taskolo/struct.Runtime.html
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Like [`macro@main`], for tests: every test gets its own runtime.
///
/// ```no_run
/// #[taskolo::test(max_workers = 1, idle_timeout_ms = 50)]
/// fn runs_task() -> anyhow::Result<()> {
///     let handle = taskolo::submit(|| {})?;
///     handle.wait()?;
///     assert!(handle.is_finished());
///     Ok(())
/// }
/// ```
///
/// Equivalent code not using `#[taskolo::test]`
///
/// ```no_run
/// #[test]
/// fn runs_task() -> anyhow::Result<()> {
///     taskolo::runtime::Builder::new()
///         .max_workers(1)
///         .idle_timeout(std::time::Duration::from_millis(50))
///         .try_build()
///         .expect("Failed building the Runtime")
///         .block_on(|| -> anyhow::Result<()> {
///             let handle = taskolo::submit(|| {})?;
///             handle.wait()?;
///             Ok(())
///         })
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}
