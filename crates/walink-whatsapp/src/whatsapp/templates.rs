//! Message templates with variable substitution.
//!
//! A template is either a placeholder body (`{{field}}` markers) or a
//! render function. Rendering never fails: a missing field renders as an
//! empty string. Looking up an unknown template name is the only error.

use crate::whatsapp::error::{WaError, WaResult};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Parameters passed to a template.
pub type TemplateParams = HashMap<String, String>;

/// Signature of a function-based template.
pub type RenderFn = Arc<dyn Fn(&TemplateParams) -> String + Send + Sync>;

/// Rendering strategy.
#[derive(Clone)]
pub enum TemplateBody {
    /// Text with `{{field}}` markers.
    Placeholder(String),
    /// Code that interpolates fields directly.
    Function(RenderFn),
}

impl fmt::Debug for TemplateBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateBody::Placeholder(body) => f.debug_tuple("Placeholder").field(body).finish(),
            TemplateBody::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// A named message template.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub name: String,
    pub description: Option<String>,
    pub body: TemplateBody,
    /// Used when a parameter is missing or empty.
    pub default_variables: HashMap<String, String>,
}

impl MessageTemplate {
    pub fn placeholder(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            body: TemplateBody::Placeholder(body.into()),
            default_variables: HashMap::new(),
        }
    }

    pub fn function<F>(name: impl Into<String>, render: F) -> Self
    where
        F: Fn(&TemplateParams) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            body: TemplateBody::Function(Arc::new(render)),
            default_variables: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_variables.insert(key.into(), value.into());
        self
    }

    /// Render with `params`, falling back to the template defaults.
    pub fn render(&self, params: &TemplateParams) -> String {
        let mut merged = self.default_variables.clone();
        for (k, v) in params {
            if !v.is_empty() || !merged.contains_key(k) {
                merged.insert(k.clone(), v.clone());
            }
        }

        match &self.body {
            TemplateBody::Placeholder(body) => render_body(body, &merged),
            TemplateBody::Function(render) => render(&merged),
        }
    }
}

/// Look up a parameter, treating a missing key as empty.
pub fn param<'a>(params: &'a TemplateParams, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

/// Name → template map. Built once, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, MessageTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in catalogue.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.load_builtins();
        registry
    }

    /// Add a template. Names are unique; placeholder bodies are validated.
    pub fn register(&mut self, template: MessageTemplate) -> WaResult<()> {
        if self.templates.contains_key(&template.name) {
            return Err(WaError::duplicate_template(&template.name));
        }
        if let TemplateBody::Placeholder(ref body) = template.body {
            validate_template_body(body).map_err(|e| {
                WaError::invalid_parameter(format!("Template \"{}\" is malformed", template.name))
                    .with_details(e)
            })?;
        }
        debug!("Registered template '{}'", template.name);
        self.templates.insert(template.name.clone(), template);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MessageTemplate> {
        self.templates.get(name)
    }

    /// Human-readable description, empty when none was given.
    pub fn describe(&self, name: &str) -> WaResult<&str> {
        self.templates
            .get(name)
            .map(|t| t.description.as_deref().unwrap_or(""))
            .ok_or_else(|| WaError::template_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Render a template by name.
    pub fn render(&self, name: &str, params: &TemplateParams) -> WaResult<String> {
        self.templates
            .get(name)
            .map(|t| t.render(params))
            .ok_or_else(|| WaError::template_not_found(name))
    }

    /// Placeholder variables of a template; empty for function templates.
    pub fn variables(&self, name: &str) -> WaResult<Vec<String>> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| WaError::template_not_found(name))?;
        match &template.body {
            TemplateBody::Placeholder(body) => {
                validate_template_body(body).map_err(WaError::invalid_parameter)
            }
            TemplateBody::Function(_) => Ok(Vec::new()),
        }
    }

    /// Register the built-in catalogue.
    pub fn load_builtins(&mut self) {
        for template in builtin_templates() {
            // Names are distinct and bodies well-formed, so this cannot fail
            // on an empty registry; a clash with a user template keeps the
            // user's version.
            if let Err(e) = self.register(template) {
                debug!("Skipping built-in template: {}", e);
            }
        }
    }
}

/// Render a template body by replacing `{{key}}` with values in one pass.
///
/// Unknown keys become empty strings. Substituted values are not rescanned.
fn render_body(body: &str, variables: &TemplateParams) -> String {
    let mut out = String::with_capacity(body.len());
    let mut remaining = body;

    while let Some(start) = remaining.find("{{") {
        out.push_str(&remaining[..start]);
        let after_start = &remaining[start + 2..];
        match after_start.find("}}") {
            Some(end) => {
                let key = after_start[..end].trim();
                out.push_str(param(variables, key));
                remaining = &after_start[end + 2..];
            }
            None => {
                out.push_str(&remaining[start..]);
                remaining = "";
            }
        }
    }

    out.push_str(remaining);
    out
}

/// Validate a template body: balanced `{{…}}` markers and sane names.
///
/// Returns the distinct variable names in order of appearance.
pub fn validate_template_body(body: &str) -> Result<Vec<String>, String> {
    let mut variables = Vec::new();
    let mut remaining = body;

    while let Some(start) = remaining.find("{{") {
        let after_start = &remaining[start + 2..];
        if let Some(end) = after_start.find("}}") {
            let var_name = after_start[..end].trim();
            if var_name.is_empty() {
                return Err(format!(
                    "Empty variable name at position {}",
                    body.len() - remaining.len() + start
                ));
            }
            if !var_name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            {
                return Err(format!("Invalid variable name: '{}'", var_name));
            }
            if !variables.iter().any(|v| v == var_name) {
                variables.push(var_name.to_string());
            }
            remaining = &after_start[end + 2..];
        } else {
            return Err(format!(
                "Unclosed '{{{{' at position {}",
                body.len() - remaining.len() + start
            ));
        }
    }

    Ok(variables)
}

fn builtin_templates() -> Vec<MessageTemplate> {
    vec![
        MessageTemplate::placeholder(
            "welcome",
            "👋 Welcome, *{{name}}*!\n\n\
             We are thrilled to have you join {{company}}.\n\n\
             To get started, please complete your profile or take a look at our \
             introductory guide. We're here if you have any questions.",
        )
        .with_description("Welcome message for a new user")
        .with_default("company", "our team"),
        MessageTemplate::placeholder(
            "verificationCode",
            "Your verification code is: *{{code}}*\n\n\
             This code will expire in 10 minutes. For your security, please do not \
             share this code with anyone.",
        )
        .with_description("One-time verification code"),
        MessageTemplate::placeholder(
            "resetCode",
            "Your password reset code is: *{{code}}*\n\n\
             If you did not request this password reset, please secure your account \
             and ignore this message.",
        )
        .with_description("Password reset code"),
        MessageTemplate::placeholder(
            "orderStatus",
            "*Order Update*\n\n\
             Status for your order *#{{orderId}}* has been updated to: *{{status}}*.\n\n\
             We will notify you of any further changes.",
        )
        .with_description("Generic order status update"),
        MessageTemplate::placeholder(
            "shippingUpdate",
            "🚚 *Your Order has Shipped!*\n\n\
             Good news! Your order *#{{orderId}}* is on its way.\n\n\
             Carrier: {{carrier}}\n\
             Tracking #: *{{trackingNumber}}*\n\n\
             You can track your package on the carrier's website.",
        )
        .with_description("Shipping update with tracking number"),
        MessageTemplate::placeholder(
            "passwordChangedNotice",
            "*Security Alert: Password Changed*\n\n\
             This is a confirmation that the password for your account (*{{username}}*) \
             was successfully changed.\n\n\
             If you did *not* make this change, please contact our support team immediately.",
        )
        .with_description("Password change confirmation"),
        MessageTemplate::function("appointmentReminder", |p| {
            let mut text = format!(
                "*Appointment Reminder*\n\n\
                 This is a friendly reminder for your upcoming appointment:\n\n\
                 Service: *{}*\n\
                 When: *{}*\n",
                param(p, "serviceName"),
                param(p, "dateTime"),
            );
            let location = param(p, "location");
            if !location.is_empty() {
                text.push_str(&format!("Where: {}\n", location));
            }
            text.push_str("\nPlease let us know if you need to reschedule.");
            text
        })
        .with_description("Upcoming appointment reminder (location optional)"),
        MessageTemplate::placeholder(
            "invoiceGenerated",
            "*New Invoice Generated*\n\n\
             A new invoice (*#{{invoiceId}}*) has been generated for your account.\n\n\
             Amount Due: *{{amount}}*\n\
             Due Date: *{{dueDate}}*\n\n\
             You can view and pay the invoice in your account dashboard.",
        )
        .with_description("New invoice notification"),
        MessageTemplate::placeholder(
            "subscriptionRenewalReminder",
            "*Subscription Renewal Notice*\n\n\
             Your *{{planName}}* plan is scheduled to renew on *{{renewalDate}}*.\n\n\
             The renewal amount will be *{{amount}}*. No action is needed if you wish \
             to continue your subscription.\n\n\
             You can manage your subscription settings in your account profile.",
        )
        .with_description("Upcoming subscription renewal"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> TemplateParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn builtins_are_registered() {
        let reg = TemplateRegistry::builtin();
        assert_eq!(reg.len(), 9);
        for name in [
            "welcome",
            "verificationCode",
            "resetCode",
            "orderStatus",
            "shippingUpdate",
            "passwordChangedNotice",
            "appointmentReminder",
            "invoiceGenerated",
            "subscriptionRenewalReminder",
        ] {
            assert!(reg.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn shipping_update_scenario() {
        let reg = TemplateRegistry::builtin();
        let text = reg
            .render(
                "shippingUpdate",
                &params(&[
                    ("orderId", "OXU-10293"),
                    ("carrier", "FedEx"),
                    ("trackingNumber", "9876543210"),
                ]),
            )
            .unwrap();
        assert!(text.contains("OXU-10293"));
        assert!(text.contains("FedEx"));
        assert!(text.contains("9876543210"));
        assert!(!text.contains("{{"));
        assert!(!text.contains("}}"));
    }

    #[test]
    fn describe_lists_builtin_descriptions() {
        let reg = TemplateRegistry::builtin();
        assert_eq!(reg.describe("invoiceGenerated").unwrap(), "New invoice notification");
        assert!(reg.describe("nope").is_err());
    }

    #[test]
    fn unknown_template_is_not_found() {
        let reg = TemplateRegistry::builtin();
        let err = reg.render("nonexistent", &TemplateParams::new()).unwrap_err();
        assert_eq!(err.code, crate::WaErrorCode::TemplateNotFound);
    }

    #[test]
    fn every_builtin_renders_with_no_params() {
        let reg = TemplateRegistry::builtin();
        for name in reg.names() {
            let text = reg.render(name, &TemplateParams::new()).unwrap();
            assert!(!text.is_empty());
            assert!(!text.contains("{{"), "{} left a marker", name);
            assert!(!text.contains("undefined"));
        }
    }

    #[test]
    fn welcome_uses_company_default() {
        let reg = TemplateRegistry::builtin();
        let text = reg.render("welcome", &params(&[("name", "John Doe")])).unwrap();
        assert!(text.contains("*John Doe*"));
        assert!(text.contains("join our team."));

        let text = reg
            .render("welcome", &params(&[("name", "Jo"), ("company", "")]))
            .unwrap();
        assert!(text.contains("join our team."));

        let text = reg
            .render(
                "welcome",
                &params(&[("name", "Jo"), ("company", "S JAY Web Solutions")]),
            )
            .unwrap();
        assert!(text.contains("join S JAY Web Solutions."));
    }

    #[test]
    fn appointment_location_line_is_optional() {
        let reg = TemplateRegistry::builtin();
        let base = [("serviceName", "Dental"), ("dateTime", "Oct 22, 2025 at 2:30 PM")];

        let without = reg.render("appointmentReminder", &params(&base)).unwrap();
        assert!(!without.contains("Where:"));

        let mut with = base.to_vec();
        with.push(("location", "Clinic 4"));
        let with = reg.render("appointmentReminder", &params(&with)).unwrap();
        assert!(with.contains("Where: Clinic 4"));
    }

    #[test]
    fn missing_field_renders_empty() {
        let mut reg = TemplateRegistry::new();
        reg.register(MessageTemplate::placeholder("t", "Hi {{name}}!"))
            .unwrap();
        assert_eq!(reg.render("t", &TemplateParams::new()).unwrap(), "Hi !");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let mut reg = TemplateRegistry::new();
        reg.register(MessageTemplate::placeholder("t", "{{a}}-{{b}}"))
            .unwrap();
        let text = reg
            .render("t", &params(&[("a", "{{b}}"), ("b", "x")]))
            .unwrap();
        assert_eq!(text, "{{b}}-x");
    }

    #[test]
    fn whitespace_inside_markers_is_trimmed() {
        let mut reg = TemplateRegistry::new();
        reg.register(MessageTemplate::placeholder("t", "Hello {{ name }}"))
            .unwrap();
        assert_eq!(
            reg.render("t", &params(&[("name", "Ann")])).unwrap(),
            "Hello Ann"
        );
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = TemplateRegistry::builtin();
        let err = reg
            .register(MessageTemplate::placeholder("welcome", "hi"))
            .unwrap_err();
        assert_eq!(err.code, crate::WaErrorCode::DuplicateTemplate);
    }

    #[test]
    fn malformed_body_rejected() {
        let mut reg = TemplateRegistry::new();
        assert!(reg
            .register(MessageTemplate::placeholder("a", "Hello {{name"))
            .is_err());
        assert!(reg
            .register(MessageTemplate::placeholder("b", "Hello {{}}"))
            .is_err());
        assert!(reg
            .register(MessageTemplate::placeholder("c", "Hello {{na me}}"))
            .is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn function_template_registers() {
        let mut reg = TemplateRegistry::new();
        reg.register(MessageTemplate::function("shout", |p| {
            param(p, "word").to_uppercase()
        }))
        .unwrap();
        assert_eq!(
            reg.render("shout", &params(&[("word", "hey")])).unwrap(),
            "HEY"
        );
        assert_eq!(reg.render("shout", &TemplateParams::new()).unwrap(), "");
        assert!(reg.variables("shout").unwrap().is_empty());
    }

    #[test]
    fn variables_lists_placeholders() {
        let reg = TemplateRegistry::builtin();
        assert_eq!(
            reg.variables("shippingUpdate").unwrap(),
            vec!["orderId", "carrier", "trackingNumber"]
        );
        assert!(reg.variables("nope").is_err());
    }
}
