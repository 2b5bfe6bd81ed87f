use std::collections::HashMap;

use handlebars::Handlebars;

use crate::error::AppError;

/// TemplateRegistry
///
/// One `Handlebars` instance per configured template-server prefix, each loaded once at
/// startup from its directory. Template servers are not part of the admin-reloadable surface,
/// so this registry is built once in `AppState` and never swapped.
pub struct TemplateRegistry {
    engines: HashMap<String, Handlebars<'static>>,
}

impl TemplateRegistry {
    pub fn load(template_servers: &HashMap<String, String>) -> Result<Self, AppError> {
        let mut engines = HashMap::new();
        for (prefix, dir) in template_servers {
            let mut hb = Handlebars::new();
            hb.register_templates_directory(".hbs", dir).map_err(|e| {
                AppError::ConfigInvalid(format!(
                    "cannot load templates from {dir} for prefix {prefix}: {e}"
                ))
            })?;
            engines.insert(prefix.clone(), hb);
        }
        Ok(Self { engines })
    }

    /// Renders `<dir>/base.hbs` overlaid with `<dir>/<url_path>/index.hbs`: the overlay is
    /// rendered first against `data`, then spliced into `base` as its `content` variable, so a
    /// `base.hbs` author writes `{{{content}}}` where the per-path body belongs.
    pub fn render(
        &self,
        prefix: &str,
        url_path: &str,
        data: &serde_json::Value,
    ) -> Result<String, AppError> {
        let engine = self
            .engines
            .get(prefix)
            .ok_or_else(|| AppError::ArtifactMissing(format!("no template server for {prefix}")))?;

        let trimmed = url_path.trim_matches('/');
        let overlay_name = if trimmed.is_empty() {
            "index".to_string()
        } else {
            format!("{trimmed}/index")
        };

        let body = engine
            .render(&overlay_name, data)
            .map_err(|e| AppError::ArtifactMissing(format!("template {overlay_name}: {e}")))?;

        let mut with_content = data.clone();
        if let serde_json::Value::Object(map) = &mut with_content {
            map.insert("content".to_string(), serde_json::Value::String(body.clone()));
        }

        engine
            .render("base", &with_content)
            .map_err(|e| AppError::ArtifactMissing(format!("template base: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_overlay_spliced_into_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.hbs"), "<html>{{{content}}}</html>").unwrap();
        std::fs::create_dir_all(dir.path().join("profile")).unwrap();
        std::fs::write(
            dir.path().join("profile").join("index.hbs"),
            "hello {{name}}",
        )
        .unwrap();

        let mut servers = HashMap::new();
        servers.insert("/t".to_string(), dir.path().to_str().unwrap().to_string());
        let registry = TemplateRegistry::load(&servers).unwrap();

        let data = serde_json::json!({"name": "ada"});
        let rendered = registry.render("/t", "/profile", &data).unwrap();
        assert_eq!(rendered, "<html>hello ada</html>");
    }

    #[test]
    fn unknown_prefix_is_artifact_missing() {
        let registry = TemplateRegistry::load(&HashMap::new()).unwrap();
        let err = registry
            .render("/nope", "/x", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, AppError::ArtifactMissing(_)));
    }
}
