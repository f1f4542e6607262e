//! Chainable query builder for tabular access.
//!
//! Builder methods are pure local accumulation; a query performs exactly
//! one network call when a terminal method resolves it, either a read
//! (`select_many`/`select_one`/`select_optional`) or a mutation
//! (`insert`/`update`/`delete`/`upsert`), never both.
//!
//! Filters are tagged variants rendered deterministically as
//! `column=operator.value`, so generated querystrings are snapshot-testable.
//! The builder percent-encodes the values it interpolates; column lists and
//! table names pass through as the caller wrote them.

use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::client::{AuthMode, Client, Payload};
use super::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    Gte,
    Lte,
    In,
    Is,
}

impl FilterOp {
    fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Is => "is",
        }
    }
}

/// A filter operand. Absent values render as the literal token `null` so
/// equality-against-null stays expressible.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    fn render(&self) -> String {
        match self {
            FilterValue::Null => "null".to_string(),
            FilterValue::Bool(value) => value.to_string(),
            FilterValue::Int(value) => value.to_string(),
            FilterValue::Float(value) => value.to_string(),
            FilterValue::Text(value) => urlencoding::encode(value).into_owned(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Int(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

#[derive(Debug, Clone)]
enum FilterRhs {
    One(FilterValue),
    Many(Vec<FilterValue>),
}

#[derive(Debug, Clone)]
struct Filter {
    column: String,
    op: FilterOp,
    rhs: FilterRhs,
}

impl Filter {
    fn render(&self) -> String {
        let rhs = match &self.rhs {
            FilterRhs::One(value) => value.render(),
            FilterRhs::Many(values) => format!(
                "({})",
                values
                    .iter()
                    .map(FilterValue::render)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        };
        format!("{}={}.{}", self.column, self.op.as_str(), rhs)
    }
}

#[derive(Debug, Clone)]
struct OrderClause {
    column: String,
    ascending: bool,
}

impl OrderClause {
    fn render(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}", self.column, direction)
    }
}

/// Accumulated descriptor for one tabular operation. Obtained from
/// `Client::from`.
pub struct Query<'a> {
    client: &'a Client,
    table: String,
    columns: String,
    filters: Vec<Filter>,
    orders: Vec<OrderClause>,
    limit: Option<u32>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(client: &'a Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
            orders: Vec::new(),
            limit: None,
        }
    }

    /// Column selection; defaults to all columns
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = if columns.is_empty() {
            "*".to_string()
        } else {
            columns.to_string()
        };
        self
    }

    pub fn eq(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, FilterOp::Eq, FilterRhs::One(value.into()))
    }

    pub fn gte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, FilterOp::Gte, FilterRhs::One(value.into()))
    }

    pub fn lte(self, column: &str, value: impl Into<FilterValue>) -> Self {
        self.filter(column, FilterOp::Lte, FilterRhs::One(value.into()))
    }

    /// Membership filter: `column=in.(a,b,c)`
    pub fn in_list<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(column, FilterOp::In, FilterRhs::Many(values))
    }

    /// Identity filter: `is.null` / `is.true` / `is.false`
    pub fn is(self, column: &str, value: Option<bool>) -> Self {
        let rhs = value.map(FilterValue::Bool).unwrap_or(FilterValue::Null);
        self.filter(column, FilterOp::Is, FilterRhs::One(rhs))
    }

    /// Ascending order clause; the first `order`/`order_desc` call is the
    /// primary sort key
    pub fn order(mut self, column: &str) -> Self {
        self.orders.push(OrderClause {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.orders.push(OrderClause {
            column: column.to_string(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, count: u32) -> Self {
        self.limit = Some(count);
        self
    }

    fn filter(mut self, column: &str, op: FilterOp, rhs: FilterRhs) -> Self {
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            rhs,
        });
        self
    }

    // ===== Read terminals =====

    /// All matching rows in query order
    pub async fn select_many<T: DeserializeOwned>(self) -> Result<Vec<T>, ApiError> {
        let path = format!("{}?{}", self.table, self.render_select());
        let value = self
            .client
            .request(
                self.client.rest_url(&path),
                Method::GET,
                header::HeaderMap::new(),
                Payload::Empty,
                AuthMode::Required,
            )
            .await?;
        rows_from_value(value)
    }

    /// Exactly one row; zero rows is `ApiError::NoRows`
    pub async fn select_one<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        self.select_many()
            .await?
            .into_iter()
            .next()
            .ok_or(ApiError::NoRows)
    }

    /// At most one row; zero rows is an absent result, not an error
    pub async fn select_optional<T: DeserializeOwned>(self) -> Result<Option<T>, ApiError> {
        Ok(self.select_many().await?.into_iter().next())
    }

    // ===== Mutation terminals =====

    /// Insert rows, returning the created representation
    pub async fn insert<T: DeserializeOwned>(
        self,
        rows: &impl Serialize,
    ) -> Result<Vec<T>, ApiError> {
        let value = self
            .client
            .request(
                self.client.rest_url(&self.table),
                Method::POST,
                prefer("return=representation"),
                Payload::Json(body_value(rows)?),
                AuthMode::Required,
            )
            .await?;
        rows_from_value(value)
    }

    /// Update rows matching the accumulated filters, returning the updated
    /// representation
    pub async fn update<T: DeserializeOwned>(
        self,
        values: &impl Serialize,
    ) -> Result<Vec<T>, ApiError> {
        let path = self.mutation_path(None);
        let value = self
            .client
            .request(
                self.client.rest_url(&path),
                Method::PATCH,
                prefer("return=representation"),
                Payload::Json(body_value(values)?),
                AuthMode::Required,
            )
            .await?;
        rows_from_value(value)
    }

    /// Delete rows matching the accumulated filters, returning the deleted
    /// representation
    pub async fn delete<T: DeserializeOwned>(self) -> Result<Vec<T>, ApiError> {
        let path = self.mutation_path(None);
        let value = self
            .client
            .request(
                self.client.rest_url(&path),
                Method::DELETE,
                prefer("return=representation"),
                Payload::Empty,
                AuthMode::Required,
            )
            .await?;
        rows_from_value(value)
    }

    /// Insert-or-overwrite by conflict key. A single row is accepted and
    /// wrapped into the array the backend expects.
    pub async fn upsert<T: DeserializeOwned>(
        self,
        rows: &impl Serialize,
        on_conflict: Option<&str>,
    ) -> Result<Vec<T>, ApiError> {
        let extra = on_conflict
            .map(|columns| format!("on_conflict={}", urlencoding::encode(columns)));
        let path = self.mutation_path(extra);
        let mut body = body_value(rows)?;
        if !body.is_array() {
            body = Value::Array(vec![body]);
        }
        let value = self
            .client
            .request(
                self.client.rest_url(&path),
                Method::POST,
                prefer("resolution=merge-duplicates,return=representation"),
                Payload::Json(body),
                AuthMode::Required,
            )
            .await?;
        rows_from_value(value)
    }

    // ===== Rendering =====

    /// Deterministic read querystring: selection, filters in call order,
    /// one comma-joined order parameter, then the limit.
    fn render_select(&self) -> String {
        let mut params = vec![format!("select={}", self.columns)];
        params.extend(self.filters.iter().map(Filter::render));
        if !self.orders.is_empty() {
            params.push(format!(
                "order={}",
                self.orders
                    .iter()
                    .map(OrderClause::render)
                    .collect::<Vec<_>>()
                    .join(",")
            ));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={limit}"));
        }
        params.join("&")
    }

    /// Mutation path: table plus the filters (and any extra parameter),
    /// with no `?` when there is nothing to append
    fn mutation_path(&self, extra: Option<String>) -> String {
        let mut params: Vec<String> = self.filters.iter().map(Filter::render).collect();
        if let Some(extra) = extra {
            params.push(extra);
        }
        if params.is_empty() {
            self.table.clone()
        } else {
            format!("{}?{}", self.table, params.join("&"))
        }
    }
}

fn prefer(value: &'static str) -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();
    headers.insert("prefer", header::HeaderValue::from_static(value));
    headers
}

fn body_value(rows: &impl Serialize) -> Result<Value, ApiError> {
    serde_json::to_value(rows)
        .map_err(|err| ApiError::InvalidResponse(format!("unserializable request body: {err}")))
}

/// Representation responses arrive as an array, a lone object, or nothing
/// at all (`return=minimal` answers); normalize all three into rows.
fn rows_from_value<T: DeserializeOwned>(value: Option<Value>) -> Result<Vec<T>, ApiError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item)
                    .map_err(|err| ApiError::InvalidResponse(format!("row: {err}")))
            })
            .collect(),
        Some(other) => serde_json::from_value::<T>(other)
            .map(|row| vec![row])
            .map_err(|err| ApiError::InvalidResponse(format!("row: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{client_against, seed_session, serve, Exchange};
    use insta::assert_snapshot;
    use serde::Deserialize;

    fn offline_client() -> Client {
        client_against("http://127.0.0.1:9").0
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct MoodLog {
        id: i64,
        mood: String,
    }

    #[test]
    fn test_render_two_filters_and_descending_order() {
        let client = offline_client();
        let query = client
            .from("mood_logs")
            .eq("caregiver_id", "u1")
            .eq("status", "active")
            .order_desc("created_at");
        assert_snapshot!(
            query.render_select(),
            @"select=*&caregiver_id=eq.u1&status=eq.active&order=created_at.desc"
        );
    }

    #[test]
    fn test_render_carries_all_clauses_regardless_of_call_order() {
        let client = offline_client();
        let a = client
            .from("mood_logs")
            .order_desc("created_at")
            .eq("status", "active")
            .eq("caregiver_id", "u1");
        let b = client
            .from("mood_logs")
            .eq("caregiver_id", "u1")
            .eq("status", "active")
            .order_desc("created_at");
        // filters keep call order within their section, but every clause
        // lands in the querystring no matter how the chain was written
        assert_eq!(
            a.render_select(),
            "select=*&status=eq.active&caregiver_id=eq.u1&order=created_at.desc"
        );
        assert_eq!(
            b.render_select(),
            "select=*&caregiver_id=eq.u1&status=eq.active&order=created_at.desc"
        );
    }

    #[test]
    fn test_render_range_in_is_and_limit() {
        let client = offline_client();
        let query = client
            .from("behavior_events")
            .select("id,mood,logged_at")
            .gte("severity", 3)
            .lte("severity", 5)
            .in_list("mood", ["calm", "anxious"])
            .is("archived", Some(false))
            .eq("resolved_by", None::<&str>)
            .order("logged_at")
            .limit(25);
        assert_snapshot!(
            query.render_select(),
            @"select=id,mood,logged_at&severity=gte.3&severity=lte.5&mood=in.(calm,anxious)&archived=is.false&resolved_by=eq.null&order=logged_at.asc&limit=25"
        );
    }

    #[test]
    fn test_render_percent_encodes_interpolated_values_only() {
        let client = offline_client();
        let query = client
            .from("documents")
            .eq("title", "care plan & notes")
            .order("title");
        assert_snapshot!(
            query.render_select(),
            @"select=*&title=eq.care%20plan%20%26%20notes&order=title.asc"
        );
    }

    #[test]
    fn test_render_mutation_paths() {
        let client = offline_client();
        let query = client.from("weekly_plans").eq("user_id", "u1");
        assert_eq!(
            query.mutation_path(Some("on_conflict=user_id,week_start".to_string())),
            "weekly_plans?user_id=eq.u1&on_conflict=user_id,week_start"
        );

        let bare = client.from("weekly_plans");
        assert_eq!(bare.mutation_path(None), "weekly_plans");
    }

    #[tokio::test]
    async fn test_select_many_issues_one_call_with_full_querystring() {
        let (base_url, server) = serve(vec![Exchange::ok(
            r#"[{"id":1,"mood":"calm"},{"id":2,"mood":"happy"}]"#,
        )])
        .await;
        let (client, store) = client_against(&base_url);
        seed_session(&store);

        let rows: Vec<MoodLog> = client
            .from("mood_logs")
            .eq("caregiver_id", "u1")
            .eq("status", "active")
            .order_desc("created_at")
            .select_many()
            .await
            .expect("rows");
        assert_eq!(
            rows,
            vec![
                MoodLog { id: 1, mood: "calm".to_string() },
                MoodLog { id: 2, mood: "happy".to_string() },
            ]
        );

        let requests = server.await.expect("server");
        assert_eq!(requests.len(), 1, "builder resolves to exactly one call");
        assert!(requests[0].starts_with(
            "GET /rest/v1/mood_logs?select=*&caregiver_id=eq.u1&status=eq.active&order=created_at.desc"
        ));
        assert!(requests[0].to_ascii_lowercase().contains("authorization: bearer a1"));
    }

    #[tokio::test]
    async fn test_select_one_zero_rows_is_no_rows_error() {
        let (base_url, server) = serve(vec![Exchange::ok("[]")]).await;
        let (client, store) = client_against(&base_url);
        seed_session(&store);

        match client
            .from("mood_logs")
            .eq("id", 42)
            .select_one::<MoodLog>()
            .await
        {
            Err(ApiError::NoRows) => {}
            other => panic!("expected NoRows, got {:?}", other.map(|_| ())),
        }
        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_select_optional_zero_rows_is_absent() {
        let (base_url, server) = serve(vec![Exchange::ok("[]")]).await;
        let (client, store) = client_against(&base_url);
        seed_session(&store);

        let row = client
            .from("mood_logs")
            .eq("id", 42)
            .select_optional::<MoodLog>()
            .await
            .expect("query");
        assert!(row.is_none());
        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_update_patches_filtered_rows() {
        let (base_url, server) = serve(vec![Exchange::ok(
            r#"[{"id":1,"mood":"settled"}]"#,
        )])
        .await;
        let (client, store) = client_against(&base_url);
        seed_session(&store);

        let rows: Vec<MoodLog> = client
            .from("mood_logs")
            .eq("id", 1)
            .update(&serde_json::json!({"mood": "settled"}))
            .await
            .expect("update");
        assert_eq!(rows[0].mood, "settled");

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("PATCH /rest/v1/mood_logs?id=eq.1"));
        let request = requests[0].to_ascii_lowercase();
        assert!(request.contains("prefer: return=representation"));
        assert!(request.contains("content-type: application/json"));
    }

    #[tokio::test]
    async fn test_upsert_wraps_single_row_and_sets_conflict_key() {
        let (base_url, server) = serve(vec![Exchange::ok(
            r#"[{"id":7,"mood":"calm"}]"#,
        )])
        .await;
        let (client, store) = client_against(&base_url);
        seed_session(&store);

        let rows: Vec<MoodLog> = client
            .from("weekly_plans")
            .upsert(
                &serde_json::json!({"user_id": "u1", "week_start": "2025-01-06"}),
                Some("user_id,week_start"),
            )
            .await
            .expect("upsert");
        assert_eq!(rows.len(), 1);

        let requests = server.await.expect("server");
        assert!(requests[0]
            .starts_with("POST /rest/v1/weekly_plans?on_conflict=user_id%2Cweek_start"));
        let request = requests[0].to_ascii_lowercase();
        assert!(request.contains("prefer: resolution=merge-duplicates,return=representation"));
        // single row travels as a one-element array
        assert!(requests[0].contains(r#"[{"user_id":"u1","week_start":"2025-01-06"}]"#));
    }

    #[tokio::test]
    async fn test_delete_returns_deleted_representation() {
        let (base_url, server) = serve(vec![Exchange::ok(r#"[{"id":9,"mood":"n/a"}]"#)]).await;
        let (client, store) = client_against(&base_url);
        seed_session(&store);

        let rows: Vec<MoodLog> = client
            .from("mood_logs")
            .eq("id", 9)
            .delete()
            .await
            .expect("delete");
        assert_eq!(rows[0].id, 9);

        let requests = server.await.expect("server");
        assert!(requests[0].starts_with("DELETE /rest/v1/mood_logs?id=eq.9"));
    }

    #[test]
    fn test_rows_from_value_normalizes_shapes() {
        let many: Vec<MoodLog> =
            rows_from_value(Some(serde_json::json!([{"id":1,"mood":"calm"}]))).expect("array");
        assert_eq!(many.len(), 1);

        let single: Vec<MoodLog> =
            rows_from_value(Some(serde_json::json!({"id":2,"mood":"happy"}))).expect("object");
        assert_eq!(single[0].id, 2);

        let none: Vec<MoodLog> = rows_from_value(None).expect("absent");
        assert!(none.is_empty());
    }
}
