use std::{collections::HashMap, io::ErrorKind, path::Path};

use tracing::{debug, info, warn};

use crate::{error::RenderError, models::template::EmailTemplate};

/// Turns a template and its data into an HTML body.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        template: EmailTemplate,
        data: &HashMap<String, String>,
    ) -> Result<String, RenderError>;
}

/// Template bodies keyed by `EmailTemplate`, rendered by `{{key}}` substitution.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<EmailTemplate, String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `<dir>/<template-id>.html` for every known template. Missing
    /// files are skipped with a warning and fail at render time instead.
    pub async fn load_dir(dir: &Path) -> Result<Self, RenderError> {
        let mut registry = Self::new();

        for template in EmailTemplate::ALL {
            let path = dir.join(format!("{}.html", template.template_id()));

            match tokio::fs::read_to_string(&path).await {
                Ok(body) => registry.register(template, body),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(
                        template = %template,
                        path = %path.display(),
                        "Template file not found, template will be unavailable"
                    );
                }
                Err(e) => {
                    return Err(RenderError::Load {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            directory = %dir.display(),
            loaded = registry.templates.len(),
            "Template registry loaded"
        );

        Ok(registry)
    }

    pub fn register(&mut self, template: EmailTemplate, body: String) {
        self.templates.insert(template, body);
    }

    pub fn with_template(mut self, template: EmailTemplate, body: &str) -> Self {
        self.register(template, body.to_string());
        self
    }

    pub fn contains(&self, template: EmailTemplate) -> bool {
        self.templates.contains_key(&template)
    }

    fn replace_variables(
        template: &str,
        variables: &HashMap<String, String>,
    ) -> Result<String, RenderError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);

            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                result.push_str(&rest[start..]);
                return Ok(result);
            };

            let key = after[..end].trim();
            match variables.get(key) {
                Some(value) => result.push_str(&escape_html(value)),
                None => {
                    let missing_var = format!("{{{{{}}}}}", key);
                    warn!(
                        missing_variable = %missing_var,
                        "Template contains unreplaced variable"
                    );
                    return Err(RenderError::MissingVariable(missing_var));
                }
            }

            rest = &after[end + 2..];
        }

        result.push_str(rest);
        Ok(result)
    }
}

impl Renderer for TemplateRegistry {
    fn render(
        &self,
        template: EmailTemplate,
        data: &HashMap<String, String>,
    ) -> Result<String, RenderError> {
        let body = self
            .templates
            .get(&template)
            .ok_or_else(|| RenderError::NotRegistered(template.template_id().to_string()))?;

        debug!(
            template = %template,
            variable_count = data.len(),
            "Rendering template"
        );

        Self::replace_variables(body, data)
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }

    escaped
}
