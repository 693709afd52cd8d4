//! Actions over the durable hierarchy: databases, tables, records and
//! fields.

use async_trait::async_trait;
use hyper::Method;
use serde_json::{json, Map, Value};

use crate::dispatch::action::{update_method, Action, ActionRequest};
use crate::dispatch::args::Args;
use crate::dispatch::context::{blocking, Context};
use crate::dispatch::error::{ApiError, Kind};

/// PUT /data/db?identifier=<db>[&encrypted=true]
pub struct DatabaseCreate;

#[async_trait]
impl Action for DatabaseCreate {
    fn name(&self) -> &'static str {
        "database_create"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "data.admin"
    }

    fn scope(&self, args: &Args) -> String {
        args.get("identifier").unwrap_or("*").to_lowercase()
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let name = request.args.require("identifier")?.to_owned();
        let encrypted = request.args.flag("encrypted");

        blocking(move || registry.create_database(&name, encrypted).map(|db| db.info())).await
    }
}

/// GET /data/db[?identifier=<db>]
pub struct DatabaseInfo;

#[async_trait]
impl Action for DatabaseInfo {
    fn name(&self) -> &'static str {
        "database_info"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn permission_op(&self) -> &'static str {
        "data.read"
    }

    fn scope(&self, args: &Args) -> String {
        args.get("identifier").unwrap_or("*").to_lowercase()
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        match request.args.get("identifier") {
            Some(name) => Ok(ctx.registry.database(name)?.info()),
            None => Ok(ctx.registry.info()),
        }
    }
}

/// DELETE /data/db?identifier=<db>
pub struct DatabaseDrop;

#[async_trait]
impl Action for DatabaseDrop {
    fn name(&self) -> &'static str {
        "database_drop"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "data.admin"
    }

    fn scope(&self, args: &Args) -> String {
        args.get("identifier").unwrap_or("*").to_lowercase()
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let name = request.args.require("identifier")?.to_owned();

        blocking(move || {
            registry.drop_database(&name)?;
            Ok(json!({"dropped": name}))
        })
        .await
    }
}

/// PUT /data/db/table?database=<db>&identifier=<table>
///
/// Optional flags: `secure` (update tokens), `adaptive` (idle unload,
/// default on), `optimize` (background compaction). An optional JSON body
/// becomes the table's default structure template.
pub struct TableCreate;

#[async_trait]
impl Action for TableCreate {
    fn name(&self) -> &'static str {
        "table_create"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "data.admin"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let name = request.args.require("identifier")?.to_owned();
        let secure = request.args.flag("secure");
        let adaptive = !request.args.contains("adaptive") || request.args.flag("adaptive");
        let optimize = request.args.flag("optimize");
        let template = request.body;

        blocking(move || {
            let table = registry.create_table(&database, &name)?;
            table.set_secure_update(secure);
            table.set_adaptive(adaptive);
            table.set_auto_optimize(optimize);
            if template.is_some() {
                table.set_template(template);
            }
            registry.persist_manifest()?;
            Ok(table.info())
        })
        .await
    }
}

/// GET /data/db/table?database=<db>[&identifier=<table>]
pub struct TableInfo;

#[async_trait]
impl Action for TableInfo {
    fn name(&self) -> &'static str {
        "table_info"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database"]
    }

    fn permission_op(&self) -> &'static str {
        "data.read"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let database = ctx.registry.database(request.args.require("database")?)?;

        match request.args.get("identifier") {
            Some(name) => Ok(database.table(name)?.info()),
            None => Ok(database.info()),
        }
    }
}

/// DELETE /data/db/table?database=<db>&identifier=<table>
pub struct TableDrop;

#[async_trait]
impl Action for TableDrop {
    fn name(&self) -> &'static str {
        "table_drop"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "data.admin"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let name = request.args.require("identifier")?.to_owned();

        blocking(move || {
            registry.drop_table(&database, &name)?;
            Ok(json!({"dropped": name}))
        })
        .await
    }
}

/// PUT /data/db/table/resolve?database=<db>&table=<t>[&mode=-1..3]
pub struct TableResolve;

#[async_trait]
impl Action for TableResolve {
    fn name(&self) -> &'static str {
        "table_resolve"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "table"]
    }

    fn permission_op(&self) -> &'static str {
        "data.admin"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let name = request.args.require("table")?.to_owned();
        let mode = match request.args.get("mode") {
            Some(mode) => Some(mode.parse::<i8>().map_err(|_| {
                ApiError::validation("\"mode\" must be an integer between -1 and 3")
            })?),
            None => None,
        };

        blocking(move || {
            let table = registry.table(&database, &name)?;
            let mode = mode.unwrap_or_else(|| table.resolve_mode());
            table.resolve_inconsistency(mode)
        })
        .await
    }
}

/// PUT /data/db/table/dataset?database=<db>&table=<t>&identifier=<id>[&field=<f>]
///
/// Without `field`: create a record from the JSON body. With `field`:
/// insert a new field into an existing record, from the body when one is
/// supplied.
pub struct DatasetPut;

#[async_trait]
impl Action for DatasetPut {
    fn name(&self) -> &'static str {
        "dataset_put"
    }

    fn method(&self) -> Method {
        Method::PUT
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "table", "identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "data.write"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let table_name = request.args.require("table")?.to_owned();
        let identifier = request.args.require("identifier")?.to_lowercase();
        let field = request.args.get("field").map(str::to_owned);
        let body = request.body;

        match field {
            None => {
                let body = body.ok_or_else(|| {
                    ApiError::new(Kind::PayloadRequired, "a JSON body is required")
                })?;
                let document = with_identifier(body, &identifier)?;

                blocking(move || {
                    let table = registry.table(&database, &table_name)?;
                    let record = table.insert_record(&document)?;
                    Ok(record.full_data())
                })
                .await
            }
            Some(field) => {
                blocking(move || {
                    let table = registry.table(&database, &table_name)?;
                    table.insert_field(&identifier, &field, body.as_ref())?;
                    Ok(json!({
                        "identifier": identifier,
                        "field": field.to_lowercase(),
                        "inserted": true,
                    }))
                })
                .await
            }
        }
    }
}

/// GET /data/db/table/dataset?database=<db>&table=<t>
///     [&identifier=<id>][&field=<f>][&acquire=true][&stats=true]
///
/// Without `identifier`: list the table's record identifiers. With
/// `field` and `acquire`, on a secure-update table, the response carries
/// an `utoken` granting exclusive update rights to that field.
pub struct DatasetGet;

#[async_trait]
impl Action for DatasetGet {
    fn name(&self) -> &'static str {
        "dataset_get"
    }

    fn method(&self) -> Method {
        Method::GET
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "table"]
    }

    fn permission_op(&self) -> &'static str {
        "data.read"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let table_name = request.args.require("table")?.to_owned();
        let identifier = request.args.get("identifier").map(str::to_lowercase);
        let field = request.args.get("field").map(str::to_owned);
        let acquire = request.args.flag("acquire");
        let stats = request.args.flag("stats");

        blocking(move || {
            let table = registry.table(&database, &table_name)?;

            let Some(identifier) = identifier else {
                return Ok(json!({
                    "database": table.database(),
                    "table": table.name(),
                    "identifiers": table.record_identifiers(),
                }));
            };

            let (value, utoken) = table.get_field(&identifier, field.as_deref(), acquire)?;

            let mut result = match &field {
                None => value,
                Some(field) => json!({
                    "database": table.database(),
                    "table": table.name(),
                    "identifier": identifier,
                    "field": field.to_lowercase(),
                    "data": value,
                }),
            };

            if let Some(object) = result.as_object_mut() {
                if let Some(utoken) = utoken {
                    object.insert("utoken".into(), Value::String(utoken));
                }
                if stats {
                    let record = table.record(&identifier)?;
                    object.insert("stats".into(), record.stats().snapshot());
                }
            }

            Ok(result)
        })
        .await
    }
}

/// UPDATE /data/db/table/dataset?database=<db>&table=<t>&identifier=<id>
///        &field=<f>[&utoken=<token>]
pub struct DatasetUpdate;

#[async_trait]
impl Action for DatasetUpdate {
    fn name(&self) -> &'static str {
        "dataset_update"
    }

    fn method(&self) -> Method {
        update_method()
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "table", "identifier", "field"]
    }

    fn needs_body(&self) -> bool {
        true
    }

    fn permission_op(&self) -> &'static str {
        "data.write"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let table_name = request.args.require("table")?.to_owned();
        let identifier = request.args.require("identifier")?.to_lowercase();
        let field = request.args.require("field")?.to_owned();
        let utoken = request.args.get("utoken").map(str::to_owned);
        let body = request
            .body
            .ok_or_else(|| ApiError::new(Kind::PayloadRequired, "a JSON body is required"))?;

        blocking(move || {
            let table = registry.table(&database, &table_name)?;
            table.update_field(&identifier, &field, &body, utoken.as_deref())?;
            Ok(json!({
                "identifier": identifier,
                "field": field.to_lowercase(),
                "updated": true,
            }))
        })
        .await
    }
}

/// DELETE /data/db/table/dataset?database=<db>&table=<t>&identifier=<id>
///        [&field=<f>]
///
/// With `field`: remove one field. Without: remove the whole record.
pub struct DatasetDelete;

#[async_trait]
impl Action for DatasetDelete {
    fn name(&self) -> &'static str {
        "dataset_delete"
    }

    fn method(&self) -> Method {
        Method::DELETE
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["database", "table", "identifier"]
    }

    fn permission_op(&self) -> &'static str {
        "data.write"
    }

    async fn execute(&self, ctx: &Context, request: ActionRequest) -> Result<Value, ApiError> {
        let registry = ctx.registry.clone();
        let database = request.args.require("database")?.to_owned();
        let table_name = request.args.require("table")?.to_owned();
        let identifier = request.args.require("identifier")?.to_lowercase();
        let field = request.args.get("field").map(str::to_owned);

        blocking(move || {
            let table = registry.table(&database, &table_name)?;
            match field {
                Some(field) => {
                    table.delete_field(&identifier, &field)?;
                    Ok(json!({
                        "identifier": identifier,
                        "field": field.to_lowercase(),
                        "deleted": true,
                    }))
                }
                None => {
                    table.delete_record(&identifier)?;
                    Ok(json!({"identifier": identifier, "deleted": true}))
                }
            }
        })
        .await
    }
}

/// Make sure the body's embedded identifier and the URL argument agree,
/// injecting the argument when the body leaves it out.
fn with_identifier(body: Value, identifier: &str) -> Result<Value, ApiError> {
    let mut object: Map<String, Value> = match body {
        Value::Object(object) => object,
        _ => return Err(ApiError::validation("record body must be a JSON object")),
    };

    match object.get("identifier").and_then(|v| v.as_str()) {
        Some(embedded) if !embedded.eq_ignore_ascii_case(identifier) => {
            return Err(ApiError::validation(
                "embedded \"identifier\" does not match the URL argument",
            ));
        }
        Some(_) => (),
        None => {
            object.insert("identifier".into(), Value::String(identifier.to_owned()));
        }
    }

    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_identifier() {
        let body = json!({"meta": 1});
        let result = with_identifier(body, "b1").unwrap();
        assert_eq!(result["identifier"], "b1");

        let body = json!({"identifier": "B1", "meta": 1});
        assert!(with_identifier(body, "b1").is_ok());

        let body = json!({"identifier": "other"});
        assert!(with_identifier(body, "b1").is_err());

        assert!(with_identifier(json!([1, 2]), "b1").is_err());
    }
}
