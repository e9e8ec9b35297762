use crate::{hasheshandlers::object_hash, Error, Result};
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const API_TEMPLATE: &str = include_str!("../templates/nova-api.conf.hbs");
const CONDUCTOR_TEMPLATE: &str = include_str!("../templates/nova-conductor.conf.hbs");

pub const MAIN_CONFIG_FILE: &str = "01-nova.conf";
pub const CUSTOM_CONFIG_FILE: &str = "03-nova-override.conf";

fn field<'a>(db: &'a Value, key: &str) -> &'a str {
    db.get(key).and_then(Value::as_str).unwrap_or_else(|| {
        warn!("handlebars::db_url received a database without {key}");
        ""
    })
}

handlebars_helper!(db_url: |db: Value| format!(
    "mysql+pymysql://{}:{}@{}/{}?read_default_file=/etc/my.cnf",
    field(&db, "user"),
    field(&db, "password"),
    field(&db, "hostname"),
    field(&db, "name")
));

#[derive(Clone, Debug)]
pub struct HandleBars<'a> {
    engine: Handlebars<'a>,
}
impl HandleBars<'_> {
    #[must_use]
    pub fn new() -> HandleBars<'static> {
        let mut engine = Handlebars::new();
        engine.set_strict_mode(true);
        engine.register_escape_fn(handlebars::no_escape);
        engine.register_helper("db_url", Box::new(db_url));
        HandleBars { engine }
    }

    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.engine
            .register_template_string(name, template)
            .map_err(Error::HbsTemplateError)
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        self.engine.render(name, data).map_err(Error::HbsRenderError)
    }
}

/// Coordinates of a database as seen by the services
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct DatabaseParams {
    pub name: String,
    pub user: String,
    pub password: String,
    pub hostname: String,
}

/// Everything a service configuration file is rendered from
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ServiceConfigParams {
    pub keystone_url: String,
    pub service_user: String,
    pub service_password: String,
    pub api_database: Option<DatabaseParams>,
    pub cell_database: Option<DatabaseParams>,
    pub transport_url: String,
    pub region: String,
    pub log_file: String,
    pub api_port: i32,
    pub workers: u32,
    pub debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    Api,
    Conductor,
}
impl ServiceKind {
    fn template(self) -> &'static str {
        match self {
            ServiceKind::Api => "nova-api",
            ServiceKind::Conductor => "nova-conductor",
        }
    }
}

/// Rendered configuration files of a service and the hash of their content
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    pub files: BTreeMap<String, String>,
    pub hash: String,
}

#[derive(Clone, Debug)]
pub struct ConfigRenderer {
    hbs: HandleBars<'static>,
}

impl ConfigRenderer {
    pub fn new() -> Result<Self> {
        let mut hbs = HandleBars::new();
        hbs.register_template(ServiceKind::Api.template(), API_TEMPLATE)?;
        hbs.register_template(ServiceKind::Conductor.template(), CONDUCTOR_TEMPLATE)?;
        Ok(Self { hbs })
    }

    /// Render the files of a service
    ///
    /// The custom configuration always lands in its own file, and every
    /// overwrite entry replaces the file of the same name
    pub fn render(
        &self,
        kind: ServiceKind,
        params: &ServiceConfigParams,
        custom_config: &str,
        overwrites: &BTreeMap<String, String>,
    ) -> Result<ServiceConfig> {
        let mut files = BTreeMap::new();
        files.insert(MAIN_CONFIG_FILE.to_string(), self.hbs.render(kind.template(), params)?);
        files.insert(CUSTOM_CONFIG_FILE.to_string(), custom_config.to_string());
        for (name, content) in overwrites {
            files.insert(name.clone(), content.clone());
        }
        let hash = object_hash(&files)?;
        Ok(ServiceConfig { files, hash })
    }
}
