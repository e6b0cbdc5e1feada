//! Client: HTTP access to a running hub, used by the CLI subcommands.
//!
//! Each call is one request against the service routes. Failures carry the
//! server's status and error text.

use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::config::ConfigDocument;
use crate::error::Result;
use crate::namespace::DocPath;


pub const DEFAULT_URL: &str = "http://127.0.0.1:8080";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);


pub struct Client {
    base: String,
    agent: ureq::Agent,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        Client {
            base: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Resolved value at `path`.
    pub fn get(&self, path: &DocPath) -> Result<Value> {
        let body = self.agent.get(&self.model_url(path)).call()?.into_string()?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Raw write of `value` at `path`.
    pub fn set(&self, path: &DocPath, value: &Value) -> Result<()> {
        self.post_json(&self.model_url(path), value)
    }

    /// Fan `value` out to every path of node `alias`.
    pub fn node(&self, alias: &str, value: &Value) -> Result<()> {
        self.post_json(&format!("{}/node/{}", self.base, alias), value)
    }

    pub fn export_config(&self) -> Result<ConfigDocument> {
        let body = self
            .agent
            .get(&format!("{}/config", self.base))
            .call()?
            .into_string()?;
        ConfigDocument::from_json(&body)
    }

    pub fn import_config(&self, doc: &ConfigDocument) -> Result<()> {
        self.post_json(&format!("{}/config", self.base), &serde_json::to_value(doc)?)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.agent
            .post(&format!("{}/cache/clear", self.base))
            .call()?;
        Ok(())
    }

    fn model_url(&self, path: &DocPath) -> String {
        if path.is_root() {
            format!("{}/model", self.base)
        } else {
            format!("{}/model/{}", self.base, path)
        }
    }

    fn post_json(&self, url: &str, value: &Value) -> Result<()> {
        debug!("POST {}", url);
        self.agent
            .post(url)
            .set("Content-Type", "application/json")
            .send_string(&value.to_string())?;
        Ok(())
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hub::Hub;
    use crate::script::ExprEvaluator;
    use crate::service::Service;
    use serde_json::json;
    use std::sync::Arc;

    fn running_hub() -> (Service, Client) {
        let doc: ConfigDocument = serde_json::from_value(json!({
            "model": {"employees": {"avgSalary": 65000}},
            "transformations": {"employees/avgSalary": "\"$\" + self + \".00\""},
            "nodes": {"pair": ["a/x", "a/y"]}
        }))
        .unwrap();
        let hub = Hub::from_document(&doc, Arc::new(ExprEvaluator::default())).unwrap();
        let service =
            Service::bind(Arc::new(hub), "127.0.0.1:0".parse().unwrap(), 1, 1024).unwrap();
        let client = Client::new(&format!("http://{}/", service.local_addr()));
        (service, client)
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        assert_eq!(Client::new("http://h:1/").base_url(), "http://h:1");
    }

    #[test]
    fn get_set_and_node() {
        let (_service, client) = running_hub();
        assert_eq!(
            client.get(&DocPath::parse("employees/avgSalary")).unwrap(),
            json!("$65000.00")
        );
        client.set(&DocPath::parse("b"), &json!({"k": true})).unwrap();
        assert_eq!(client.get(&DocPath::parse("b/k")).unwrap(), json!(true));
        client.node("pair", &json!(7)).unwrap();
        assert_eq!(client.get(&DocPath::parse("a")).unwrap(), json!({"x": 7, "y": 7}));
    }

    #[test]
    fn server_errors_surface_as_http_errors() {
        let (_service, client) = running_hub();
        let err = client.get(&DocPath::parse("missing")).unwrap_err();
        assert!(matches!(err, Error::Http(ref m) if m.contains("404")));
        assert!(client.node("ghost", &json!(1)).is_err());
    }

    #[test]
    fn config_round_trip_through_the_service() {
        let (_service, client) = running_hub();
        let mut doc = client.export_config().unwrap();
        assert_eq!(doc.nodes["pair"], vec!["a/x".to_string(), "a/y".to_string()]);
        doc.model.insert("fresh".into(), json!(1));
        client.import_config(&doc).unwrap();
        client.clear_cache().unwrap();
        assert_eq!(client.get(&DocPath::parse("fresh")).unwrap(), json!(1));
    }
}
