use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use platform_core::{PlatformError, PlatformResult};

/// 数据字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }

    fn parse(raw: &str) -> PlatformResult<Self> {
        match raw {
            "string" => Ok(FieldKind::String),
            "integer" => Ok(FieldKind::Integer),
            "float" => Ok(FieldKind::Float),
            "boolean" => Ok(FieldKind::Boolean),
            "array" => Ok(FieldKind::Array),
            "object" => Ok(FieldKind::Object),
            other => Err(PlatformError::Validation(format!(
                "不支持的字段类型: {other}"
            ))),
        }
    }

    /// 判断JSON值是否符合该类型
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            // 整数字面量也可以作为浮点参数传入
            FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }
}

/// 规范化的数据需求声明
///
/// 字段按名称排序存储，保证同一需求无论声明顺序如何
/// 都有唯一的规范表示。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct NormalizedRequirement {
    pub fields: BTreeMap<String, FieldKind>,
}

/// 参数与需求的比对结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequirementCheck {
    pub missing_fields: Vec<String>,
    /// (字段名, 期望类型, 实际收到的JSON类型)
    pub type_mismatches: Vec<(String, String, String)>,
}

impl RequirementCheck {
    pub fn is_ok(&self) -> bool {
        self.missing_fields.is_empty() && self.type_mismatches.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing_fields.is_empty() {
            parts.push(format!("缺少字段: {}", self.missing_fields.join(", ")));
        }
        for (name, expect, got) in &self.type_mismatches {
            parts.push(format!("字段 {name} 类型不匹配: 期望{expect}, 实际{got}"));
        }
        parts.join("; ")
    }
}

impl NormalizedRequirement {
    pub fn from_fields(fields: Vec<(String, FieldKind)>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// 从JSON声明解析需求，形如 `{"city": "string", "days": "integer"}`
    pub fn resolve(value: &serde_json::Value) -> PlatformResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            PlatformError::Validation("数据需求声明必须是JSON对象".to_string())
        })?;
        let mut fields = BTreeMap::new();
        for (name, kind) in obj {
            if name.trim().is_empty() {
                return Err(PlatformError::Validation("字段名不能为空".to_string()));
            }
            let kind_str = kind.as_str().ok_or_else(|| {
                PlatformError::Validation(format!("字段 {name} 的类型声明必须是字符串"))
            })?;
            fields.insert(name.clone(), FieldKind::parse(kind_str)?);
        }
        Ok(Self { fields })
    }

    /// 用于身份哈希计算的规范字符串，字段已按名称排序
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        for (name, kind) in &self.fields {
            out.push_str(name);
            out.push(':');
            out.push_str(kind.as_str());
            out.push(';');
        }
        out
    }

    /// 检查执行参数是否满足该需求
    pub fn check(&self, args: &serde_json::Value) -> RequirementCheck {
        let mut result = RequirementCheck::default();
        let empty = serde_json::Map::new();
        let obj = args.as_object().unwrap_or(&empty);
        for (name, kind) in &self.fields {
            match obj.get(name) {
                None => result.missing_fields.push(name.clone()),
                Some(value) if !kind.matches(value) => {
                    result.type_mismatches.push((
                        name.clone(),
                        kind.as_str().to_string(),
                        json_type_name(value).to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
