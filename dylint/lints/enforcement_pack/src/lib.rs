//! Enforcement pack: custom lints for sirius-access invariants.
//!
//! ## Implemented Lints
//!
//! - `NO_PRINTLN`: Forbids println!, eprintln!, and dbg! so that all output
//!   goes through `tracing` (and `CheckLog` inside the check routine), where
//!   principal ids are structured fields and portal tokens stay redacted.
//! - `NO_BLOCKING_SLEEP`: Forbids `std::thread::sleep`. The scheduler and push
//!   channel run on the Tokio runtime; a blocking sleep stalls every timer and
//!   breaks paused-clock tests.

#![feature(rustc_private)]
#![warn(unused_extern_crates)]

extern crate rustc_ast;
extern crate rustc_lint;
extern crate rustc_session;
extern crate rustc_span;

use rustc_ast::{Expr, ExprKind, MacCall, Path};
use rustc_lint::{EarlyContext, EarlyLintPass, LintContext};
use rustc_session::{declare_lint_pass, declare_tool_lint};
use rustc_span::Span;

declare_tool_lint! {
    /// **What it does:** Forbids `println!`, `eprintln!` and `dbg!` in library code.
    ///
    /// **Why is this bad?** Output written straight to stdout/stderr carries no
    /// `principal_id` or `trigger` fields, never reaches the audit target, and
    /// can print a portal token that `tracing` output would have redacted.
    ///
    /// **Example:**
    /// ```rust,ignore
    /// // Bad
    /// println!("revalidating {}", principal_id);
    ///
    /// // Good
    /// log.debug(format_args!("revalidating group membership"));
    /// tracing::warn!(principal_id, "access revoked");
    /// ```
    pub enforcement_pack::NO_PRINTLN,
    Deny,
    "use of println!, eprintln!, or dbg! macros; use tracing instead"
}

declare_tool_lint! {
    /// **What it does:** Forbids `std::thread::sleep` / `thread::sleep`.
    ///
    /// **Why is this bad?** Timers, trigger listeners and membership streams
    /// share the Tokio runtime. Blocking a worker delays every check.
    ///
    /// **Example:**
    /// ```rust,ignore
    /// // Bad
    /// std::thread::sleep(delay);
    ///
    /// // Good
    /// tokio::time::sleep(delay).await;
    /// ```
    pub enforcement_pack::NO_BLOCKING_SLEEP,
    Deny,
    "use of std::thread::sleep; use tokio::time::sleep instead"
}

declare_lint_pass!(NoPrintln => [NO_PRINTLN]);
declare_lint_pass!(NoBlockingSleep => [NO_BLOCKING_SLEEP]);

impl EarlyLintPass for NoPrintln {
    fn check_expr(&mut self, cx: &EarlyContext<'_>, expr: &Expr) {
        if let ExprKind::MacCall(mac) = &expr.kind {
            check_macro(cx, mac, expr.span);
        }
    }
}

impl EarlyLintPass for NoBlockingSleep {
    fn check_expr(&mut self, cx: &EarlyContext<'_>, expr: &Expr) {
        let ExprKind::Call(callee, _) = &expr.kind else {
            return;
        };
        let ExprKind::Path(_, path) = &callee.kind else {
            return;
        };
        if is_thread_sleep(path) {
            cx.span_lint(NO_BLOCKING_SLEEP, expr.span, |diag| {
                diag.help("use `tokio::time::sleep(..).await`");
                diag.note("blocking sleeps stall the runtime driving access checks");
            });
        }
    }
}

fn is_thread_sleep(path: &Path) -> bool {
    let names: Vec<_> = path
        .segments
        .iter()
        .map(|segment| segment.ident.name.as_str().to_owned())
        .collect();
    matches!(names.as_slice(), [.., thread, sleep] if thread == "thread" && sleep == "sleep")
}

fn check_macro(cx: &EarlyContext<'_>, mac: &MacCall, span: Span) {
    let path = &mac.path;

    // single-segment calls only
    if path.segments.len() != 1 {
        return;
    }

    let (help, note) = match path.segments[0].ident.name.as_str() {
        "println" => (
            "use `tracing::info!` for structured logging",
            "`println!` output has no principal or trigger fields",
        ),
        "eprintln" => (
            "use `tracing::warn!` or `tracing::error!` for structured logging",
            "`eprintln!` output has no principal or trigger fields",
        ),
        "dbg" => (
            "use `tracing::debug!` for structured logging",
            "`dbg!` may print a portal token unredacted",
        ),
        _ => return,
    };
    cx.span_lint(NO_PRINTLN, span, |diag| {
        diag.help(help);
        diag.note(note);
    });
}

#[unsafe(no_mangle)]
#[allow(unsafe_code)]
pub extern "C" fn register_lints(_sess: &rustc_session::Session, lint_store: &mut rustc_lint::LintStore) {
    lint_store.register_lints(&[&NO_PRINTLN, &NO_BLOCKING_SLEEP]);
    lint_store.register_early_pass(|| Box::new(NoPrintln));
    lint_store.register_early_pass(|| Box::new(NoBlockingSleep));
}

#[unsafe(no_mangle)]
pub fn dylint_version() -> *mut std::os::raw::c_char {
    std::ffi::CString::new(dylint_linting::DYLINT_VERSION)
        .expect("version string contains null byte")
        .into_raw()
}
