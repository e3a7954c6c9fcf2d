use crate::error::{AgentError, Result};

/// A prompt with `{name}` placeholders for a fixed set of input variables.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, input_variables: &[&str]) -> Self {
        Self {
            template: template.into(),
            input_variables: input_variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Substitute every declared variable in one left-to-right pass, so
    /// placeholders inside substituted values are left alone. Values for
    /// undeclared names are ignored.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String> {
        let lookup = |var: &str| values.iter().find(|(name, _)| *name == var).map(|(_, v)| *v);
        if let Some(missing) = self.input_variables.iter().find(|v| lookup(v.as_str()).is_none()) {
            return Err(AgentError::Prompt(format!("missing value for '{}'", missing)));
        }

        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let declared = after
                .find('}')
                .map(|close| &after[..close])
                .filter(|name| self.input_variables.iter().any(|v| v.as_str() == *name));
            match declared.and_then(|name| lookup(name).map(|value| (name, value))) {
                Some((name, value)) => {
                    out.push_str(value);
                    rest = &after[name.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}
