use serde_json::Value;

/// Selects the list items to drop from a stored array.
pub enum Removal<'a> {
    /// Drop items for which the predicate returns `true`.
    Where(&'a dyn Fn(&Value) -> bool),
    /// Drop items equal to the value.
    Value(&'a Value),
}

impl Removal<'_> {
    pub fn matches(&self, item: &Value) -> bool {
        match self {
            Removal::Where(pred) => pred(item),
            Removal::Value(v) => item == *v,
        }
    }

    /// Returns `items` without the matching entries.
    pub fn retain(&self, mut items: Vec<Value>) -> Vec<Value> {
        items.retain(|item| !self.matches(item));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_and_predicate_selection() {
        let items = vec![json!(1), json!(2), json!(3), json!(2)];
        assert_eq!(Removal::Value(&json!(2)).retain(items.clone()), vec![json!(1), json!(3)]);
        let odd = |v: &Value| v.as_i64().is_some_and(|n| n % 2 == 1);
        assert_eq!(Removal::Where(&odd).retain(items), vec![json!(2), json!(2)]);
    }
}
