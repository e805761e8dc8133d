//! # Notification subscriptions.
//!
//! A requester subscribes to a provider with a list of value expressions, a
//! conjunction of conditions over them, and the name of one of its own
//! component-specific methods to call back. The provider's runtime evaluates
//! every subscription once per tick:
//!
//! ```text
//! conditions false ──► true   : fire callback(values), mark satisfied
//! conditions true  ──► true   : nothing (edge-triggered)
//! conditions true  ──► false  : re-arm
//! ```
//!
//! A subscription is identified by `(requester, callback, value expressions)`;
//! requesting the same identity again replaces its conditions and re-arms it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{MeshError, MeshResult};
use crate::identity::ComponentId;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    /// `==`
    #[serde(rename = "==")]
    Eq,
    /// `!=`
    #[serde(rename = "!=")]
    Ne,
    /// `<`
    #[serde(rename = "<")]
    Lt,
    /// `<=`
    #[serde(rename = "<=")]
    Le,
    /// `>`
    #[serde(rename = ">")]
    Gt,
    /// `>=`
    #[serde(rename = ">=")]
    Ge,
}

impl Op {
    /// Operator symbol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    /// Applies the operator. Values of different JSON types are never ordered;
    /// they compare unequal.
    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            Op::Eq => json_eq(left, right),
            Op::Ne => !json_eq(left, right),
            ordering => match json_cmp(left, right) {
                Some(o) => match ordering {
                    Op::Lt => o == Ordering::Less,
                    Op::Le => o != Ordering::Greater,
                    Op::Gt => o == Ordering::Greater,
                    Op::Ge => o != Ordering::Less,
                    Op::Eq | Op::Ne => false,
                },
                None => false,
            },
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "<" => Op::Lt,
            "<=" => Op::Le,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            other => return Err(MeshError::invalid(format!("unknown operator {other:?}"))),
        })
    }
}

fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// `expr op value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Value expression evaluated on the provider.
    pub expr: String,
    /// Operator.
    pub op: Op,
    /// Right-hand side.
    pub value: Value,
}

impl Condition {
    /// Builds a condition.
    pub fn new(expr: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        Self {
            expr: expr.into(),
            op,
            value: value.into(),
        }
    }
}

/// One subscription held by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Component to call back.
    pub requester: ComponentId,
    /// Expressions whose values are delivered with the callback.
    pub value_expressions: Vec<String>,
    /// Conjunctive conditions; empty means "fire once".
    pub conditions: Vec<Condition>,
    /// Requester method to invoke.
    pub callback: String,
    /// Whether the conditions held at the last evaluation.
    pub active: bool,
}

impl Notification {
    fn same_identity(&self, requester: &ComponentId, callback: &str, values: &[String]) -> bool {
        &self.requester == requester && self.callback == callback && self.value_expressions == values
    }
}

/// A callback that is due.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    /// Component to call.
    pub requester: ComponentId,
    /// Method to call.
    pub callback: String,
    /// Current values keyed by expression.
    pub values: Map<String, Value>,
}

/// Subscriptions of one provider.
#[derive(Debug, Default)]
pub struct NotificationEngine {
    subs: Mutex<Vec<Notification>>,
}

impl NotificationEngine {
    /// Empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription or replaces the conditions of an existing one.
    ///
    /// Returns `true` if an existing subscription was replaced.
    pub async fn request(
        &self,
        requester: ComponentId,
        value_expressions: Vec<String>,
        conditions: Vec<Condition>,
        callback: impl Into<String>,
    ) -> MeshResult<bool> {
        let callback = callback.into();
        if callback.is_empty() {
            return Err(MeshError::invalid("empty callback name"));
        }

        let mut subs = self.subs.lock().await;
        if let Some(n) = subs
            .iter_mut()
            .find(|n| n.same_identity(&requester, &callback, &value_expressions))
        {
            n.conditions = conditions;
            n.active = false;
            return Ok(true);
        }
        subs.push(Notification {
            requester,
            value_expressions,
            conditions,
            callback,
            active: false,
        });
        Ok(false)
    }

    /// Removes a subscription. Missing entries are a no-op; returns whether one was removed.
    pub async fn cancel(&self, requester: &ComponentId, value_expressions: &[String], callback: &str) -> bool {
        let mut subs = self.subs.lock().await;
        let before = subs.len();
        subs.retain(|n| !n.same_identity(requester, callback, value_expressions));
        subs.len() != before
    }

    /// Drops every subscription owned by `requester`.
    pub async fn drop_requester(&self, requester: &ComponentId) -> usize {
        let mut subs = self.subs.lock().await;
        let before = subs.len();
        subs.retain(|n| &n.requester != requester);
        before - subs.len()
    }

    /// Drops everything (provider shutdown).
    pub async fn clear(&self) {
        self.subs.lock().await.clear();
    }

    /// Current subscriptions.
    pub async fn list(&self) -> Vec<Notification> {
        self.subs.lock().await.clone()
    }

    /// Evaluates every subscription with `lookup` and returns the callbacks that
    /// became due. Missing values make a condition false.
    pub async fn evaluate<F>(&self, lookup: F) -> Vec<Fired>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let mut subs = self.subs.lock().await;
        let mut due = Vec::new();

        for n in subs.iter_mut() {
            let holds = n.conditions.iter().all(|c| {
                lookup(&c.expr)
                    .map(|v| c.op.apply(&v, &c.value))
                    .unwrap_or(false)
            });
            if holds && !n.active {
                let values = n
                    .value_expressions
                    .iter()
                    .map(|e| (e.clone(), lookup(e).unwrap_or(Value::Null)))
                    .collect();
                due.push(Fired {
                    requester: n.requester.clone(),
                    callback: n.callback.clone(),
                    values,
                });
            }
            n.active = holds;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> ComponentId {
        ComponentId::new("Client", "alice").expect("id")
    }

    #[test]
    fn operators_follow_json_types() {
        assert!(Op::Gt.apply(&json!(5), &json!(3.5)));
        assert!(Op::Eq.apply(&json!(2), &json!(2.0)));
        assert!(Op::Lt.apply(&json!("abc"), &json!("abd")));
        assert!(!Op::Lt.apply(&json!(1), &json!("2")));
        assert!(Op::Ne.apply(&json!(true), &json!(false)));
        assert!(!Op::Ge.apply(&json!(true), &json!(false)));
        assert_eq!("<=".parse::<Op>().expect("op"), Op::Le);
        assert!("=>".parse::<Op>().is_err());
    }

    #[tokio::test]
    async fn fires_only_on_rising_edge() {
        let engine = NotificationEngine::new();
        engine
            .request(
                alice(),
                vec!["temp".into()],
                vec![Condition::new("temp", Op::Gt, 50)],
                "onHot",
            )
            .await
            .expect("request");

        let at = |t: i64| move |e: &str| (e == "temp").then(|| json!(t));

        assert!(engine.evaluate(at(40)).await.is_empty());
        let fired = engine.evaluate(at(60)).await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].values.get("temp"), Some(&json!(60)));
        assert!(engine.evaluate(at(70)).await.is_empty());
        assert!(engine.evaluate(at(30)).await.is_empty());
        assert_eq!(engine.evaluate(at(55)).await.len(), 1);
    }

    #[tokio::test]
    async fn same_identity_replaces_conditions() {
        let engine = NotificationEngine::new();
        let values = vec!["temp".to_string()];
        let replaced = engine
            .request(alice(), values.clone(), vec![Condition::new("temp", Op::Gt, 50)], "cb")
            .await
            .expect("request");
        assert!(!replaced);
        let replaced = engine
            .request(alice(), values.clone(), vec![Condition::new("temp", Op::Lt, 0)], "cb")
            .await
            .expect("request");
        assert!(replaced);

        let subs = engine.list().await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].conditions[0].op, Op::Lt);
    }

    #[tokio::test]
    async fn cancel_of_missing_entry_is_noop() {
        let engine = NotificationEngine::new();
        assert!(!engine.cancel(&alice(), &[], "cb").await);
        engine
            .request(alice(), vec![], vec![], "cb")
            .await
            .expect("request");
        assert!(engine.cancel(&alice(), &[], "cb").await);
    }

    #[tokio::test]
    async fn empty_conditions_fire_once() {
        let engine = NotificationEngine::new();
        engine
            .request(alice(), vec!["x".into()], vec![], "cb")
            .await
            .expect("request");
        assert_eq!(engine.evaluate(|_| None).await.len(), 1);
        assert!(engine.evaluate(|_| None).await.is_empty());
    }

    #[tokio::test]
    async fn dropping_requester_removes_all_its_entries() {
        let engine = NotificationEngine::new();
        let bob = ComponentId::new("Client", "bob").expect("id");
        engine.request(alice(), vec![], vec![], "a").await.expect("req");
        engine.request(alice(), vec![], vec![], "b").await.expect("req");
        engine.request(bob.clone(), vec![], vec![], "a").await.expect("req");
        assert_eq!(engine.drop_requester(&alice()).await, 2);
        assert_eq!(engine.list().await[0].requester, bob);
    }
}
