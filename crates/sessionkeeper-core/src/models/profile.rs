use serde::{Deserialize, Serialize};

/// Authenticated identity as returned by `GET /auth/user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    #[serde(rename = "usuario")]
    pub username: String,
    #[serde(rename = "nombre", default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(rename = "modulos", alias = "modules", default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    #[serde(rename = "nombre", alias = "name")]
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "nombre", alias = "name", default)]
    pub name: Option<String>,
    pub slug: String,
}

impl Profile {
    /// Name to show in prompts, falling back to the login name
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }

    pub fn role(&self, slug: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.slug == slug)
    }

    pub fn has_role(&self, slug: &str) -> bool {
        self.role(slug).is_some()
    }

    pub fn role_slugs(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.slug.as_str()).collect()
    }

    pub fn module_slugs(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.slug.as_str()).collect()
    }
}
