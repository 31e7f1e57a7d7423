//! 数据过滤
//!
//! 支持两种表格形状：记录数组 `[{"a": 1}, ...]` 和列式对象
//! `{"a": [1, 2], "b": [3, 4]}`。缺失字段的行永远不匹配；数字按 f64 比较，
//! 字符串、布尔值、null 只与同类型比较。

use std::cmp::Ordering;

use datapipe_core::{DataPipeError, DataPipeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinOperator {
    #[default]
    And,
    Or,
}

/// 单个过滤条件 (字段, 值, 操作符)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub value: Value,
    pub operator: Operator,
}

impl Condition {
    pub fn new(field: impl Into<String>, value: impl Into<Value>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }

    fn matches(&self, row: &Map<String, Value>) -> bool {
        let Some(actual) = row.get(&self.field) else {
            return false;
        };
        let ordering = compare(actual, &self.value);
        match self.operator {
            Operator::Equal => ordering == Some(Ordering::Equal),
            Operator::NotEqual => ordering != Some(Ordering::Equal),
            Operator::LessThan => ordering == Some(Ordering::Less),
            Operator::LessOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            Operator::GreaterThan => ordering == Some(Ordering::Greater),
            Operator::GreaterOrEqual => {
                matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn row_matches(row: &Map<String, Value>, conditions: &[Condition], join: JoinOperator) -> bool {
    match join {
        JoinOperator::And => conditions.iter().all(|c| c.matches(row)),
        JoinOperator::Or => conditions.iter().any(|c| c.matches(row)),
    }
}

/// 对表格形状的数据应用过滤条件，空条件返回完整数据
pub fn filter_data(data: &Value, conditions: &[Condition], join: JoinOperator) -> DataPipeResult<Value> {
    if conditions.is_empty() {
        return Ok(data.clone());
    }

    match data {
        Value::Array(rows) => {
            let mut kept = Vec::new();
            for row in rows {
                let record = row.as_object().ok_or_else(|| {
                    DataPipeError::UnsupportedFilter("数组元素必须是对象".to_string())
                })?;
                if row_matches(record, conditions, join) {
                    kept.push(row.clone());
                }
            }
            Ok(Value::Array(kept))
        }
        Value::Object(columns) => filter_columns(columns, conditions, join),
        other => Err(DataPipeError::UnsupportedFilter(format!(
            "无法过滤 {} 类型的数据",
            type_name(other)
        ))),
    }
}

fn filter_columns(
    columns: &Map<String, Value>,
    conditions: &[Condition],
    join: JoinOperator,
) -> DataPipeResult<Value> {
    let mut length = None;
    for (name, column) in columns {
        let values = column.as_array().ok_or_else(|| {
            DataPipeError::UnsupportedFilter(format!("列 {name} 不是数组"))
        })?;
        match length {
            None => length = Some(values.len()),
            Some(len) if len != values.len() => {
                return Err(DataPipeError::UnsupportedFilter(format!(
                    "列 {name} 的长度与其它列不一致"
                )))
            }
            Some(_) => {}
        }
    }

    let mut result: Map<String, Value> = columns
        .keys()
        .map(|name| (name.clone(), Value::Array(Vec::new())))
        .collect();

    for index in 0..length.unwrap_or(0) {
        let row: Map<String, Value> = columns
            .iter()
            .map(|(name, column)| (name.clone(), column[index].clone()))
            .collect();
        if !row_matches(&row, conditions, join) {
            continue;
        }
        for (name, value) in row {
            if let Some(Value::Array(kept)) = result.get_mut(&name) {
                kept.push(value);
            }
        }
    }
    Ok(Value::Object(result))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Value {
        Value::Array((0..10).map(|i| json!({"foo": i, "bar": i % 2 == 0})).collect())
    }

    fn count(conditions: &[Condition], join: JoinOperator) -> usize {
        filter_data(&rows(), conditions, join)
            .unwrap()
            .as_array()
            .map(Vec::len)
            .unwrap_or_default()
    }

    #[test]
    fn test_single_operator_counts() {
        let cases = [
            (Operator::Equal, 1),
            (Operator::NotEqual, 9),
            (Operator::LessThan, 4),
            (Operator::LessOrEqual, 5),
            (Operator::GreaterThan, 5),
            (Operator::GreaterOrEqual, 6),
        ];
        for (operator, expected) in cases {
            let condition = Condition::new("foo", 4, operator);
            assert_eq!(count(&[condition], JoinOperator::And), expected, "{operator:?}");
        }
    }

    #[test]
    fn test_join_operators() {
        let low = Condition::new("foo", 3, Operator::LessThan);
        let high = Condition::new("foo", 7, Operator::GreaterThan);
        let even = Condition::new("bar", true, Operator::Equal);

        // 不相交的条件，OR 等于各自结果之和
        assert_eq!(count(&[low.clone(), high.clone()], JoinOperator::Or), 3 + 2);
        assert_eq!(count(&[low.clone(), high], JoinOperator::And), 0);
        // 0, 2 是偶数且小于 3
        assert_eq!(count(&[low, even], JoinOperator::And), 2);
    }

    #[test]
    fn test_empty_conditions_return_everything() {
        assert_eq!(filter_data(&rows(), &[], JoinOperator::And).unwrap(), rows());
        assert_eq!(filter_data(&json!("raw"), &[], JoinOperator::Or).unwrap(), json!("raw"));
    }

    #[test]
    fn test_columnar_data() {
        let data = json!({"a": [1, 2, 3, 4], "b": ["x", "y", "x", "z"]});
        let filtered = filter_data(
            &data,
            &[Condition::new("b", "x", Operator::Equal)],
            JoinOperator::And,
        )
        .unwrap();
        assert_eq!(filtered, json!({"a": [1, 3], "b": ["x", "x"]}));
    }

    #[test]
    fn test_missing_field_and_scalar_data() {
        let condition = Condition::new("missing", 1, Operator::NotEqual);
        assert_eq!(count(&[condition.clone()], JoinOperator::And), 0);
        assert!(matches!(
            filter_data(&json!(42), &[condition], JoinOperator::And),
            Err(DataPipeError::UnsupportedFilter(_))
        ));
    }
}
