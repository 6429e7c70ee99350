use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Student {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            first_name: None,
            last_name: None,
            email: None,
        }
    }

    pub fn display_name(&self) -> String {
        match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(name), None) | (None, Some(name)) => name.to_string(),
            (None, None) => self.email.clone().unwrap_or_else(|| self.id.clone()),
        }
    }
}

/// A user field the backend sends either as a bare id or as a populated document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserRef {
    Id(String),
    Populated(Student),
}

impl UserRef {
    pub fn id(&self) -> &str {
        match self {
            UserRef::Id(id) => id,
            UserRef::Populated(student) => &student.id,
        }
    }
}

impl From<&str> for UserRef {
    fn from(value: &str) -> Self {
        UserRef::Id(value.to_string())
    }
}
