use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::domain::BioassayId;
use crate::error::KiraError;
use crate::table::CellValue;

#[derive(Debug, Clone, Deserialize)]
pub struct BioassayRecord {
    #[serde(rename = "PC_AssaySubmit")]
    pub submit: AssaySubmit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssaySubmit {
    pub assay: AssayContainer,
    #[serde(default)]
    pub data: Option<Vec<SubstanceEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssayContainer {
    pub descr: AssayDescription,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssayDescription {
    pub aid: AidRef,
    #[serde(default)]
    pub aid_source: Option<AssaySource>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<ResultColumn>>,
    #[serde(default, deserialize_with = "lenient_targets")]
    pub target: Option<Vec<TargetInfo>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AidRef {
    pub id: u64,
    #[serde(default)]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssaySource {
    #[serde(default)]
    pub db: Option<SourceDb>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceDb {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultColumn {
    pub tid: i64,
    pub name: String,
    #[serde(default)]
    pub unit: Option<i64>,
    #[serde(default)]
    pub sunit: Option<String>,
    #[serde(default)]
    pub descr: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubstanceEntry {
    pub sid: i64,
    #[serde(default, alias = "sid-source")]
    pub sid_source: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub comment: Option<Value>,
    #[serde(default)]
    pub outcome: Option<Value>,
    #[serde(default)]
    pub rank: Option<Value>,
    #[serde(default)]
    pub data: Option<Vec<Measurement>>,
    #[serde(default)]
    pub url: Option<Value>,
    #[serde(default)]
    pub xref: Option<Value>,
    #[serde(default)]
    pub date: Option<Value>,
}

impl SubstanceEntry {
    pub fn passthrough_fields(&self) -> Vec<(&'static str, &Value)> {
        [
            ("sid_source", self.sid_source.as_ref()),
            ("version", self.version.as_ref()),
            ("comment", self.comment.as_ref()),
            ("rank", self.rank.as_ref()),
            ("url", self.url.as_ref()),
            ("xref", self.xref.as_ref()),
            ("date", self.date.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measurement {
    pub tid: i64,
    pub value: MeasuredValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasuredValue {
    Ival(i64),
    Fval(f64),
    Bval(bool),
    Sval(String),
    Iset(Vec<i64>),
    Fset(Vec<f64>),
    Bset(Vec<bool>),
    Sset(Vec<String>),
}

impl MeasuredValue {
    pub fn to_cell(&self) -> CellValue {
        match self {
            MeasuredValue::Ival(value) => CellValue::Integer(*value),
            MeasuredValue::Fval(value) => CellValue::Real(*value),
            MeasuredValue::Bval(value) => CellValue::Boolean(*value),
            MeasuredValue::Sval(value) => CellValue::Text(value.clone()),
            MeasuredValue::Iset(values) => CellValue::Text(json_text(values)),
            MeasuredValue::Fset(values) => CellValue::Text(json_text(values)),
            MeasuredValue::Bset(values) => CellValue::Text(json_text(values)),
            MeasuredValue::Sset(values) => CellValue::Text(json_text(values)),
        }
    }
}

fn json_text<T: serde::Serialize>(values: &[T]) -> String {
    serde_json::to_string(values).unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TargetInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mol_id: Option<MolId>,
    #[serde(default)]
    pub molecule_type: Option<Value>,
    #[serde(default)]
    pub organism: Option<Value>,
    #[serde(default)]
    pub descr: Option<Value>,
    #[serde(default)]
    pub comment: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MolId {
    #[serde(default)]
    pub protein_accession: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl BioassayRecord {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KiraError> {
        serde_json::from_slice(bytes).map_err(|err| KiraError::RecordShape(err.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, KiraError> {
        serde_json::from_value(value).map_err(|err| KiraError::RecordShape(err.to_string()))
    }

    pub fn aid(&self) -> BioassayId {
        BioassayId::new(self.submit.assay.descr.aid.id)
    }

    pub fn name(&self) -> Option<&str> {
        self.submit.assay.descr.name.as_deref()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.submit
            .assay
            .descr
            .aid_source
            .as_ref()
            .and_then(|source| source.db.as_ref())
            .and_then(|db| db.name.as_deref())
    }

    pub fn data(&self) -> Option<&[SubstanceEntry]> {
        self.submit.data.as_deref()
    }

    pub fn results(&self) -> Option<&[ResultColumn]> {
        self.submit.assay.descr.results.as_deref()
    }

    pub fn targets(&self) -> Option<&[TargetInfo]> {
        self.submit.assay.descr.target.as_deref()
    }
}

pub fn value_to_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Bool(flag) => CellValue::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => CellValue::Integer(int),
            None => number
                .as_f64()
                .map(CellValue::Real)
                .unwrap_or_else(|| CellValue::Text(number.to_string())),
        },
        Value::String(text) => CellValue::Text(text.clone()),
        Value::Array(_) | Value::Object(_) => CellValue::Text(value.to_string()),
    }
}

fn lenient_targets<'de, D>(deserializer: D) -> Result<Option<Vec<TargetInfo>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let items = match raw {
        Value::Array(items) => items,
        Value::Null => return Ok(None),
        other => vec![other],
    };
    let mut targets = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<TargetInfo>(item) {
            Ok(target) => targets.push(target),
            Err(err) => tracing::warn!(error = %err, "dropping malformed target element"),
        }
    }
    Ok(Some(targets))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document(descr: Value, data: Option<Value>) -> Value {
        let mut submit = json!({ "assay": { "descr": descr } });
        if let Some(data) = data {
            submit["data"] = data;
        }
        json!({ "PC_AssaySubmit": submit })
    }

    #[test]
    fn decodes_tagged_values() {
        let raw = json!([{ "tid": 1, "value": { "fval": 5.5 } },
                         { "tid": 2, "value": { "sval": "ok" } },
                         { "tid": 3, "value": { "iset": [1, 2] } }]);
        let parsed: Vec<Measurement> = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed[0].value.to_cell(), CellValue::Real(5.5));
        assert_eq!(parsed[1].value.to_cell(), CellValue::Text("ok".to_string()));
        assert_eq!(parsed[2].value.to_cell(), CellValue::Text("[1,2]".to_string()));
    }

    #[test]
    fn missing_sections_are_none() {
        let record = BioassayRecord::from_value(document(json!({ "aid": { "id": 7 } }), None))
            .unwrap();
        assert_eq!(record.aid().get(), 7);
        assert!(record.data().is_none());
        assert!(record.results().is_none());
        assert!(record.targets().is_none());
    }

    #[test]
    fn malformed_target_elements_are_dropped() {
        let descr = json!({
            "aid": { "id": 9 },
            "target": [
                { "mol_id": "not-an-object" },
                { "name": "kinase", "mol_id": { "protein_accession": "P12345.1" } }
            ]
        });
        let record = BioassayRecord::from_value(document(descr, None)).unwrap();
        let targets = record.targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name.as_deref(), Some("kinase"));
    }

    #[test]
    fn source_name_is_optional() {
        let descr = json!({
            "aid": { "id": 3 },
            "aid_source": { "db": { "name": "ChEMBL", "source_id": { "str": "x" } } }
        });
        let record = BioassayRecord::from_value(document(descr, None)).unwrap();
        assert_eq!(record.source_name(), Some("ChEMBL"));
    }

    #[test]
    fn passthrough_keeps_schema_order() {
        let entry: SubstanceEntry = serde_json::from_value(json!({
            "sid": 11, "rank": 4, "version": 1, "outcome": 2, "comment": ["note"]
        }))
        .unwrap();
        let names: Vec<_> = entry.passthrough_fields().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["version", "comment", "rank"]);
    }
}
