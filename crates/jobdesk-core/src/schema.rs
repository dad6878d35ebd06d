//! Field translation between semantic records and remote table rows.
//!
//! Semantic records use the camelCase names of the [`crate::models`] structs.
//! Remote rows use the snake_case column names of the hosted store. Each
//! entity kind has a static field→column table; [`Schema::validated`] turns
//! those tables into checked bidirectional [`FieldMap`]s so that drift (two
//! fields on one column, a derived field written remotely, ...) fails at
//! startup instead of corrupting rows.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SchemaError;

/// A record in either semantic or remote form.
pub type Record = Map<String, Value>;

/// Remote column that scopes every non-tenant row.
pub const TENANT_COLUMN: &str = "user_id";

/// Semantic name of the tenant-scoping attribute.
pub const TENANT_FIELD: &str = "userId";

/// The stored entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tenant,
    Client,
    Job,
    JobItem,
    Invoice,
    Quote,
    MileageRecord,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Tenant,
        EntityKind::Client,
        EntityKind::Job,
        EntityKind::JobItem,
        EntityKind::Invoice,
        EntityKind::Quote,
        EntityKind::MileageRecord,
    ];

    /// Remote table name, also used as the local snapshot key.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "profiles",
            EntityKind::Client => "clients",
            EntityKind::Job => "jobs",
            EntityKind::JobItem => "job_items",
            EntityKind::Invoice => "invoices",
            EntityKind::Quote => "quotes",
            EntityKind::MileageRecord => "mileage",
        }
    }

    /// Tenants are keyed by identity and carry no scoping column.
    pub fn is_tenant(&self) -> bool {
        matches!(self, EntityKind::Tenant)
    }

    /// Semantic name of the primary key.
    pub fn primary_key(&self) -> &'static str {
        match self {
            EntityKind::Tenant => "identity",
            _ => "id",
        }
    }

    fn field_columns(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            EntityKind::Tenant => &[
                ("identity", "user_id"),
                ("businessName", "business_name"),
                ("ownerName", "owner_name"),
                ("email", "email"),
                ("phone", "phone"),
                ("address", "address"),
                ("defaultMileageRate", "default_mileage_rate"),
                ("timeZone", "time_zone"),
                ("invoicePrefix", "invoice_prefix"),
                ("createdAt", "created_at"),
                ("updatedAt", "updated_at"),
            ],
            EntityKind::Client => &[
                ("id", "id"),
                ("name", "name"),
                ("displayName", "display_name"),
                ("email", "email"),
                ("phone", "phone"),
                ("address", "address"),
                ("notes", "notes"),
                ("createdAt", "created_at"),
                ("updatedAt", "updated_at"),
            ],
            EntityKind::Job => &[
                ("id", "id"),
                ("clientId", "client_id"),
                ("title", "title"),
                ("status", "status"),
                ("scheduleMode", "schedule_mode"),
                ("startDate", "start_date"),
                ("endDate", "end_date"),
                ("startTime", "start_time"),
                ("endTime", "end_time"),
                ("shifts", "shifts"),
                ("location", "location"),
                ("notes", "notes"),
                ("rate", "rate"),
                ("rateType", "rate_type"),
                ("publishToCalendar", "publish_to_calendar"),
                ("createdAt", "created_at"),
                ("updatedAt", "updated_at"),
            ],
            EntityKind::JobItem => &[
                ("id", "id"),
                ("jobId", "job_id"),
                ("description", "description"),
                ("quantity", "quantity"),
                ("unitPrice", "unit_price"),
                ("createdAt", "created_at"),
            ],
            EntityKind::Invoice => &[
                ("id", "id"),
                ("clientId", "client_id"),
                ("jobId", "job_id"),
                ("quoteId", "quote_id"),
                ("number", "invoice_number"),
                ("status", "status"),
                ("issueDate", "issue_date"),
                ("dueDate", "due_date"),
                ("subtotal", "subtotal"),
                ("taxRate", "tax_rate"),
                ("paidAt", "paid_at"),
                ("notes", "notes"),
                ("createdAt", "created_at"),
                ("updatedAt", "updated_at"),
            ],
            EntityKind::Quote => &[
                ("id", "id"),
                ("clientId", "client_id"),
                ("jobId", "job_id"),
                ("number", "quote_number"),
                ("status", "status"),
                ("issueDate", "issue_date"),
                ("validUntil", "valid_until"),
                ("subtotal", "subtotal"),
                ("taxRate", "tax_rate"),
                ("notes", "notes"),
                ("createdAt", "created_at"),
                ("updatedAt", "updated_at"),
            ],
            EntityKind::MileageRecord => &[
                ("id", "id"),
                ("jobId", "job_id"),
                ("date", "trip_date"),
                ("origin", "origin"),
                ("destination", "destination"),
                ("miles", "miles"),
                ("ratePerMile", "rate_per_mile"),
                ("purpose", "purpose"),
                ("createdAt", "created_at"),
            ],
        }
    }

    fn derived_fields(&self) -> &'static [DerivedField] {
        match self {
            EntityKind::JobItem => LINE_ITEM_DERIVED,
            EntityKind::Invoice | EntityKind::Quote => TAXED_DERIVED,
            EntityKind::MileageRecord => MILEAGE_DERIVED,
            _ => &[],
        }
    }
}

const LINE_ITEM_DERIVED: &[DerivedField] = &[DerivedField {
    name: "amount",
    compute: line_amount,
}];

const TAXED_DERIVED: &[DerivedField] = &[DerivedField {
    name: "total",
    compute: taxed_total,
}];

const MILEAGE_DERIVED: &[DerivedField] = &[DerivedField {
    name: "deduction",
    compute: mileage_deduction,
}];

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A field computed client-side from other fields and never stored remotely.
#[derive(Clone, Copy)]
pub struct DerivedField {
    pub name: &'static str,
    compute: fn(&Record) -> Option<Value>,
}

impl fmt::Debug for DerivedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedField").field("name", &self.name).finish()
    }
}

fn number(record: &Record, field: &str) -> Option<f64> {
    record.get(field).and_then(Value::as_f64)
}

fn money(amount: f64) -> Option<Value> {
    serde_json::Number::from_f64((amount * 100.0).round() / 100.0).map(Value::Number)
}

fn line_amount(record: &Record) -> Option<Value> {
    money(number(record, "quantity")? * number(record, "unitPrice")?)
}

fn taxed_total(record: &Record) -> Option<Value> {
    let subtotal = number(record, "subtotal")?;
    let tax_rate = number(record, "taxRate").unwrap_or(0.0);
    money(subtotal + subtotal * tax_rate / 100.0)
}

fn mileage_deduction(record: &Record) -> Option<Value> {
    money(number(record, "miles")? * number(record, "ratePerMile")?)
}

/// Checked bidirectional field↔column mapping for one entity kind.
#[derive(Debug, Clone)]
pub struct FieldMap {
    kind: EntityKind,
    to_column: HashMap<&'static str, &'static str>,
    to_field: HashMap<&'static str, &'static str>,
    derived: &'static [DerivedField],
}

impl FieldMap {
    /// Build a map, rejecting anything that is not a bijection.
    pub fn build(
        kind: EntityKind,
        pairs: &[(&'static str, &'static str)],
        derived: &'static [DerivedField],
    ) -> Result<Self, SchemaError> {
        let mut to_column = HashMap::with_capacity(pairs.len());
        let mut to_field = HashMap::with_capacity(pairs.len());

        for &(field, column) in pairs {
            if to_column.insert(field, column).is_some() {
                return Err(SchemaError::DuplicateField {
                    kind,
                    field: field.to_string(),
                });
            }
            if to_field.insert(column, field).is_some() {
                return Err(SchemaError::DuplicateColumn {
                    kind,
                    column: column.to_string(),
                });
            }
            if !kind.is_tenant() && (column == TENANT_COLUMN || field == TENANT_FIELD) {
                return Err(SchemaError::TenantColumnClaimed {
                    kind,
                    column: column.to_string(),
                    field: field.to_string(),
                });
            }
        }

        if let Some(d) = derived.iter().find(|d| to_column.contains_key(d.name)) {
            return Err(SchemaError::DerivedFieldMapped {
                kind,
                field: d.name.to_string(),
            });
        }

        let pk = kind.primary_key();
        if !to_column.contains_key(pk) {
            return Err(SchemaError::MissingPrimaryKey {
                kind,
                field: pk.to_string(),
            });
        }

        Ok(Self {
            kind,
            to_column,
            to_field,
            derived,
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Column for a semantic field. Unmapped fields pass through unchanged.
    pub fn column<'a>(&self, field: &'a str) -> &'a str {
        self.to_column.get(field).copied().unwrap_or(field)
    }

    /// Semantic field for a column. Unmapped columns pass through unchanged.
    pub fn field<'a>(&self, column: &'a str) -> &'a str {
        self.to_field.get(column).copied().unwrap_or(column)
    }

    /// Remote column holding the primary key.
    pub fn key_column(&self) -> &'static str {
        self.to_column[self.kind.primary_key()]
    }

    fn is_derived(&self, field: &str) -> bool {
        self.derived.iter().any(|d| d.name == field)
    }

    fn shadows_mapped_column(&self, field: &str) -> bool {
        !self.to_column.contains_key(field) && self.to_field.contains_key(field)
    }
}

/// All field maps, validated together.
#[derive(Debug, Clone)]
pub struct Schema {
    maps: HashMap<EntityKind, FieldMap>,
}

impl Schema {
    /// Build and validate the mapping for every entity kind.
    pub fn validated() -> Result<Self, SchemaError> {
        let mut maps = HashMap::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let map = FieldMap::build(kind, kind.field_columns(), kind.derived_fields())?;
            maps.insert(kind, map);
        }
        Ok(Self { maps })
    }

    pub fn map(&self, kind: EntityKind) -> &FieldMap {
        // `validated` inserts every kind, so the lookup cannot miss.
        &self.maps[&kind]
    }

    /// Translate a semantic record into a remote row.
    ///
    /// Injects the tenant column (never for tenants themselves), renames
    /// mapped fields, passes the rest through, drops derived fields and
    /// omits nulls so client-side defaults never clobber remote data.
    pub fn to_remote(&self, kind: EntityKind, record: &Record, tenant: Option<&str>) -> Record {
        let map = self.map(kind);
        let mut row = Record::new();

        for (field, value) in record {
            if value.is_null() || map.is_derived(field) {
                continue;
            }
            if !kind.is_tenant() && field == TENANT_FIELD {
                row.insert(TENANT_COLUMN.to_string(), value.clone());
                continue;
            }
            if map.shadows_mapped_column(field) {
                tracing::warn!(%kind, field = %field, "dropping field that shadows a mapped column");
                continue;
            }
            row.insert(map.column(field).to_string(), value.clone());
        }

        if !kind.is_tenant() {
            if let Some(tenant) = tenant {
                row.insert(TENANT_COLUMN.to_string(), Value::String(tenant.to_string()));
            }
        }

        row
    }

    /// Translate a remote row back into a semantic record and recompute
    /// derived fields.
    pub fn from_remote(&self, kind: EntityKind, row: &Record) -> Record {
        let map = self.map(kind);
        let mut record = Record::new();

        for (column, value) in row {
            if value.is_null() {
                continue;
            }
            let field = if !kind.is_tenant() && column == TENANT_COLUMN {
                TENANT_FIELD
            } else {
                map.field(column)
            };
            record.insert(field.to_string(), value.clone());
        }

        for derived in map.derived {
            match (derived.compute)(&record) {
                Some(value) => {
                    record.insert(derived.name.to_string(), value);
                }
                None => {
                    record.remove(derived.name);
                }
            }
        }

        record
    }

    /// Translate equality filters into column conditions.
    pub fn filter_columns(&self, kind: EntityKind, filter: &Filter) -> Vec<(String, Value)> {
        let map = self.map(kind);
        filter
            .conditions()
            .iter()
            .map(|(field, value)| {
                let column = if !kind.is_tenant() && field == TENANT_FIELD {
                    TENANT_COLUMN
                } else {
                    map.column(field)
                };
                (column.to_string(), value.clone())
            })
            .collect()
    }

    /// Primary key of a semantic record, as a string.
    pub fn key_of(&self, kind: EntityKind, record: &Record) -> Option<String> {
        value_as_key(record.get(kind.primary_key())?)
    }

    /// Primary key of a remote row, as a string.
    pub fn row_key(&self, kind: EntityKind, row: &Record) -> Option<String> {
        value_as_key(row.get(self.map(kind).key_column())?)
    }
}

/// String form of a key value; empty strings and non-scalars are not keys.
pub(crate) fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Equality filter over semantic field names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match records whose `field` equals `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Filter on the kind's primary key.
    pub fn by_key(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::new().eq(kind.primary_key(), Value::String(id.into()))
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// The primary key value this filter pins, if any.
    pub fn pinned_key(&self, kind: EntityKind) -> Option<String> {
        self.conditions
            .iter()
            .find(|(field, _)| field == kind.primary_key())
            .and_then(|(_, value)| value_as_key(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn default_schema_validates() {
        let schema = Schema::validated().unwrap();
        assert_eq!(schema.map(EntityKind::Job).key_column(), "id");
        assert_eq!(schema.map(EntityKind::Tenant).key_column(), "user_id");
    }

    #[test]
    fn to_remote_renames_injects_tenant_and_omits_nulls() {
        let schema = Schema::validated().unwrap();
        let job = record(json!({
            "id": "J1",
            "clientId": "C1",
            "startDate": "2025-06-01",
            "notes": null,
            "customFlag": true,
        }));

        let row = schema.to_remote(EntityKind::Job, &job, Some("tenant-1"));

        assert_eq!(row["client_id"], "C1");
        assert_eq!(row["start_date"], "2025-06-01");
        assert_eq!(row["user_id"], "tenant-1");
        assert_eq!(row["customFlag"], true);
        assert!(!row.contains_key("notes"));
        assert!(!row.contains_key("clientId"));
    }

    #[test]
    fn to_remote_skips_tenant_injection_for_tenant_kind() {
        let schema = Schema::validated().unwrap();
        let profile = record(json!({"identity": "tenant-1", "businessName": "Acme"}));
        let row = schema.to_remote(EntityKind::Tenant, &profile, Some("tenant-1"));
        assert_eq!(row.len(), 2);
        assert_eq!(row["user_id"], "tenant-1");
        assert_eq!(row["business_name"], "Acme");
    }

    #[test]
    fn derived_fields_are_stripped_and_recomputed() {
        let schema = Schema::validated().unwrap();
        let item = record(json!({
            "id": "I1",
            "quantity": 3,
            "unitPrice": 12.5,
            "amount": 999.0,
        }));

        let row = schema.to_remote(EntityKind::JobItem, &item, Some("t"));
        assert!(!row.contains_key("amount"));

        let back = schema.from_remote(EntityKind::JobItem, &row);
        assert_eq!(back["amount"], json!(37.5));
    }

    #[test]
    fn taxed_total_defaults_missing_rate_to_zero() {
        let schema = Schema::validated().unwrap();
        let row = record(json!({"id": "Q1", "subtotal": 200.0}));
        let quote = schema.from_remote(EntityKind::Quote, &row);
        assert_eq!(quote["total"], json!(200.0));

        let row = record(json!({"id": "Q2", "subtotal": 200.0, "tax_rate": 8.25}));
        let quote = schema.from_remote(EntityKind::Quote, &row);
        assert_eq!(quote["total"], json!(216.5));
    }

    #[test]
    fn derived_field_removed_when_inputs_missing() {
        let schema = Schema::validated().unwrap();
        let row = record(json!({"id": "M1", "miles": 12.0, "deduction": 4.0}));
        let trip = schema.from_remote(EntityKind::MileageRecord, &row);
        assert!(!trip.contains_key("deduction"));
    }

    #[test]
    fn field_shadowing_a_mapped_column_is_dropped() {
        let schema = Schema::validated().unwrap();
        let job = record(json!({"id": "J1", "client_id": "sneaky", "clientId": "C1"}));
        let row = schema.to_remote(EntityKind::Job, &job, None);
        assert_eq!(row["client_id"], "C1");
    }

    #[test]
    fn filters_translate_through_the_map() {
        let schema = Schema::validated().unwrap();
        let filter = Filter::new().eq("clientId", "C1").eq("userId", "t");
        let columns = schema.filter_columns(EntityKind::Job, &filter);
        assert_eq!(
            columns,
            vec![
                ("client_id".to_string(), json!("C1")),
                ("user_id".to_string(), json!("t")),
            ]
        );
        assert_eq!(Filter::by_key(EntityKind::Tenant, "t").pinned_key(EntityKind::Tenant), Some("t".into()));
    }

    #[test]
    fn build_rejects_duplicate_column() {
        let err = FieldMap::build(
            EntityKind::Client,
            &[("id", "id"), ("name", "name"), ("displayName", "name")],
            &[],
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateColumn {
                kind: EntityKind::Client,
                column: "name".into()
            }
        );
    }

    #[test]
    fn build_rejects_duplicate_field() {
        let err = FieldMap::build(
            EntityKind::Client,
            &[("id", "id"), ("name", "name"), ("name", "full_name")],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn build_rejects_claimed_tenant_column() {
        let err = FieldMap::build(EntityKind::Job, &[("id", "id"), ("owner", "user_id")], &[])
            .unwrap_err();
        assert!(matches!(err, SchemaError::TenantColumnClaimed { .. }));
    }

    #[test]
    fn build_rejects_missing_primary_key() {
        let err = FieldMap::build(EntityKind::Job, &[("title", "title")], &[]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn build_rejects_mapped_derived_field() {
        let err = FieldMap::build(
            EntityKind::JobItem,
            &[("id", "id"), ("amount", "amount")],
            EntityKind::JobItem.derived_fields(),
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DerivedFieldMapped { .. }));
    }
}
