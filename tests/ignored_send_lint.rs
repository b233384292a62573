//! AST-level test to detect ignored send and publish results.
//!
//! The hub has two outbound paths: the broadcast bus and the MQTT client.
//! Dropping the result of either hides a lost notification.
//!
//! Example of bad code:
//! ```ignore
//! let _ = client.publish(topic, QoS::AtLeastOnce, false, payload).await;
//! ```
//!
//! Example of correct code:
//! ```ignore
//! if let Err(e) = client.publish(topic, QoS::AtLeastOnce, false, payload).await {
//!     tracing::warn!("MQTT publish to {} failed: {}", topic, e);
//! }
//! ```
//!
//! `EventBus::publish` returns nothing, so a bare `bus.publish(..)` statement
//! is fine. Bare `send` statements are not.

use std::fs;
use std::path::Path;
use syn::visit::Visit;
use syn::{Expr, ExprMethodCall, File, Pat, Stmt};
use walkdir::WalkDir;

/// Methods whose result must not be discarded with `let _`.
const RESULT_METHODS: &[&str] = &["send", "try_send", "publish", "try_publish"];
/// Methods that must not be used as bare statements.
const BARE_METHODS: &[&str] = &["send", "try_send"];

struct IgnoredSendVisitor {
    current_file: String,
    violations: Vec<(String, String)>,
}

impl IgnoredSendVisitor {
    fn new(file: String) -> Self {
        Self {
            current_file: file,
            violations: Vec::new(),
        }
    }

    /// The method call behind `expr`, looking through one `.await`.
    fn method_call(expr: &Expr) -> Option<&ExprMethodCall> {
        match expr {
            Expr::MethodCall(call) => Some(call),
            Expr::Await(awaited) => match &*awaited.base {
                Expr::MethodCall(call) => Some(call),
                _ => None,
            },
            _ => None,
        }
    }

    fn flag(&mut self, method: &str, context: &str) {
        self.violations.push((
            self.current_file.clone(),
            format!("{} ({})", context, method),
        ));
    }
}

impl<'ast> Visit<'ast> for IgnoredSendVisitor {
    fn visit_stmt(&mut self, stmt: &'ast Stmt) {
        match stmt {
            Stmt::Local(local) if matches!(local.pat, Pat::Wild(_)) => {
                if let Some(call) = local.init.as_ref().and_then(|i| Self::method_call(&i.expr)) {
                    let method = call.method.to_string();
                    if RESULT_METHODS.contains(&method.as_str()) {
                        self.flag(&method, "let _ = ... discards the result");
                    }
                }
            }
            Stmt::Expr(expr, Some(_)) => {
                if let Some(call) = Self::method_call(expr) {
                    let method = call.method.to_string();
                    if BARE_METHODS.contains(&method.as_str()) {
                        self.flag(&method, "bare statement ignores the result");
                    }
                }
            }
            _ => {}
        }

        syn::visit::visit_stmt(self, stmt);
    }
}

fn analyze_source(name: &str, content: &str) -> Vec<(String, String)> {
    let syntax: File = match syn::parse_file(content) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Warning: Failed to parse {}: {}", name, e);
            return vec![];
        }
    };

    let mut visitor = IgnoredSendVisitor::new(name.to_string());
    visitor.visit_file(&syntax);
    visitor.violations
}

#[test]
fn detects_discarded_mqtt_publish() {
    let bad_code = r#"
        async fn example(client: AsyncClient) {
            let _ = client.publish("home/kitchen/light1/set", QoS::AtLeastOnce, false, "ON").await;
        }
    "#;
    assert_eq!(analyze_source("test.rs", bad_code).len(), 1);
}

#[test]
fn detects_bare_send_statement() {
    let bad_code = r#"
        fn example() {
            let (tx, rx) = broadcast::channel(16);
            tx.send(42);
        }
    "#;
    assert_eq!(analyze_source("test.rs", bad_code).len(), 1);
}

#[test]
fn allows_handled_results_and_bus_publish() {
    let good_code = r#"
        async fn example(bus: SharedBus, client: AsyncClient) {
            bus.publish(BusEvent::command("kitchen", "light1", "ON".to_string()));
            if let Err(e) = client.publish("t", QoS::AtLeastOnce, false, "ON").await {
                tracing::warn!("{}", e);
            }
            if tx.send(42).is_err() {
                tracing::trace!("no subscribers");
            }
        }
    "#;
    assert!(analyze_source("test.rs", good_code).is_empty());
}

#[test]
fn no_ignored_send_violations() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");

    let mut all_violations = Vec::new();
    for entry in WalkDir::new(&src_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
    {
        let path = entry.path();
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        all_violations.extend(analyze_source(&path.display().to_string(), &content));
    }

    if !all_violations.is_empty() {
        let mut error_msg = String::from(
            "\n\nFound ignored send/publish results!\n\
             Fix by handling the result:\n\
             // BAD:  let _ = client.publish(..).await;\n\
             // GOOD: if let Err(e) = client.publish(..).await { tracing::warn!(..) }\n\n\
             Violations:\n",
        );
        for (file, context) in &all_violations {
            error_msg.push_str(&format!("  - {}: {}\n", file, context));
        }
        panic!("{}", error_msg);
    }
}
