//! SQL statements with bound parameters.
//!
//! The registry is reached through a CLI that takes SQL text, so parameters
//! cannot travel out of band. A [`Statement`] keeps the text and the values
//! apart until [`Statement::render`], which substitutes each `?` with a
//! properly quoted literal. Placeholders inside string literals are left
//! alone.

use std::fmt;

use thiserror::Error;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Bool(bool),
    Null,
}

impl SqlValue {
    fn literal(&self) -> Result<String, BindError> {
        match self {
            SqlValue::Text(s) => {
                if s.contains('\0') {
                    return Err(BindError::Nul);
                }
                Ok(format!("'{}'", s.replace('\'', "''")))
            }
            SqlValue::Integer(n) => Ok(n.to_string()),
            SqlValue::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            SqlValue::Null => Ok("NULL".to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<&String> for SqlValue {
    fn from(s: &String) -> Self {
        SqlValue::Text(s.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Integer(n)
    }
}

impl From<u64> for SqlValue {
    /// Epoch timestamps; saturates at `i64::MAX`.
    fn from(n: u64) -> Self {
        SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        SqlValue::Bool(b)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Binding failed; nothing was sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("statement has {placeholders} placeholders but {params} parameters were bound")]
    Count { placeholders: usize, params: usize },

    #[error("text parameter contains a NUL byte")]
    Nul,
}

/// SQL text plus the values for its `?` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Produce the final SQL text with every placeholder replaced.
    pub fn render(&self) -> Result<String, BindError> {
        let placeholders = count_placeholders(&self.sql);
        if placeholders != self.params.len() {
            return Err(BindError::Count {
                placeholders,
                params: self.params.len(),
            });
        }

        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut params = self.params.iter();
        let mut in_literal = false;
        for c in self.sql.chars() {
            match c {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(c);
                }
                '?' if !in_literal => {
                    let value = params.next().ok_or(BindError::Count {
                        placeholders,
                        params: self.params.len(),
                    })?;
                    out.push_str(&value.literal()?);
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

fn count_placeholders(sql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

/// `?, ?, ?` for an `IN (...)` list of `n` values.
pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_in_order() {
        let sql = Statement::new("SELECT * FROM containers WHERE service = ? AND healthy = ? LIMIT ?")
            .bind("web")
            .bind(true)
            .bind(5i64)
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM containers WHERE service = 'web' AND healthy = 1 LIMIT 5"
        );
    }

    #[test]
    fn quotes_are_doubled() {
        let sql = Statement::new("INSERT INTO services (name) VALUES (?)")
            .bind("x'); DROP TABLE servers; --")
            .render()
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO services (name) VALUES ('x''); DROP TABLE servers; --')"
        );
    }

    #[test]
    fn placeholder_inside_literal_is_ignored() {
        let sql = Statement::new("SELECT '?' || ?").bind("a").render().unwrap();
        assert_eq!(sql, "SELECT '?' || 'a'");
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let err = Statement::new("SELECT ?, ?").bind(1i64).render().unwrap_err();
        assert_eq!(err, BindError::Count { placeholders: 2, params: 1 });

        let err = Statement::new("SELECT 1").bind(1i64).render().unwrap_err();
        assert_eq!(err, BindError::Count { placeholders: 0, params: 1 });
    }

    #[test]
    fn nul_is_rejected() {
        let err = Statement::new("SELECT ?").bind("a\0b").render().unwrap_err();
        assert_eq!(err, BindError::Nul);
    }

    #[test]
    fn null_and_option() {
        let sql = Statement::new("VALUES (?, ?, ?)")
            .bind(None::<String>)
            .bind(Some(7u64))
            .bind(u64::MAX)
            .render()
            .unwrap();
        assert_eq!(sql, format!("VALUES (NULL, 7, {})", i64::MAX));
    }

    #[test]
    fn in_list_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(1), "?");
    }
}
