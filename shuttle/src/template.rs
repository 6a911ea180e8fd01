//! `TemplateRenderer`: substitutes `{{ns.key}}` tokens where
//! `ns ∈ {input, output, memory}`. Single left-to-right pass, no
//! re-expansion of substituted text.

use std::collections::HashMap;

use serde_json::Value;

/// Renders `{{ns.key}}` placeholders against the three namespaces available
/// to a node: `globalInput`, `previousOutput`, and `runMemory`.
pub struct TemplateRenderer;

impl TemplateRenderer {
    /// A pure function of `(template, global_input, previous_output, run_memory)`
    ///.
    pub fn render(
        template: &str,
        global_input: &Value,
        previous_output: &Value,
        run_memory: &HashMap<String, Value>,
    ) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            match after_open.find("}}") {
                Some(end) => {
                    let token = after_open[..end].trim();
                    out.push_str(&Self::resolve(token, global_input, previous_output, run_memory));
                    rest = &after_open[end + 2..];
                }
                None => {
                    // Unterminated token: emit the rest verbatim and stop.
                    out.push_str(rest);
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn resolve(
        token: &str,
        global_input: &Value,
        previous_output: &Value,
        run_memory: &HashMap<String, Value>,
    ) -> String {
        let Some((ns, key)) = token.split_once('.') else {
            return String::new();
        };
        match ns {
            "input" => value_as_string(global_input.get(key)),
            "memory" => value_as_string(run_memory.get(key)),
            "output" => {
                if key == "text" {
                    previous_output.as_str().unwrap_or_default().to_string()
                } else {
                    match previous_output {
                        Value::Object(_) => value_as_string(previous_output.get(key)),
                        _ => String::new(),
                    }
                }
            }
            _ => String::new(),
        }
    }
}

fn value_as_string(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_key_substitutes_from_global_input() {
        let out = TemplateRenderer::render(
            "Say {{input.msg}}",
            &json!({"msg": "hi"}),
            &Value::Null,
            &HashMap::new(),
        );
        assert_eq!(out, "Say hi");
    }

    #[test]
    fn missing_key_substitutes_empty() {
        let out = TemplateRenderer::render(
            "Say {{input.missing}}!",
            &json!({"msg": "hi"}),
            &Value::Null,
            &HashMap::new(),
        );
        assert_eq!(out, "Say !");
    }

    #[test]
    fn output_text_reads_string_previous_output() {
        let out = TemplateRenderer::render(
            "{{output.text}}",
            &Value::Null,
            &Value::String("echo: hi".to_string()),
            &HashMap::new(),
        );
        assert_eq!(out, "echo: hi");
    }

    #[test]
    fn output_other_reads_object_field() {
        let out = TemplateRenderer::render(
            "{{output.answer}}",
            &Value::Null,
            &json!({"answer": "42"}),
            &HashMap::new(),
        );
        assert_eq!(out, "42");
    }

    #[test]
    fn output_other_on_string_output_is_empty() {
        let out = TemplateRenderer::render(
            "{{output.answer}}",
            &Value::Null,
            &Value::String("plain".to_string()),
            &HashMap::new(),
        );
        assert_eq!(out, "");
    }

    #[test]
    fn memory_key_substitutes_from_run_memory() {
        let mut mem = HashMap::new();
        mem.insert("name".to_string(), Value::String("Ada".to_string()));
        let out = TemplateRenderer::render("Hi {{memory.name}}", &Value::Null, &Value::Null, &mem);
        assert_eq!(out, "Hi Ada");
    }

    #[test]
    fn unknown_namespace_substitutes_empty() {
        let out = TemplateRenderer::render("{{bogus.key}}", &Value::Null, &Value::Null, &HashMap::new());
        assert_eq!(out, "");
    }

    #[test]
    fn single_pass_no_reexpansion() {
        let mut mem = HashMap::new();
        mem.insert("tpl".to_string(), Value::String("{{input.msg}}".to_string()));
        let out = TemplateRenderer::render(
            "{{memory.tpl}}",
            &json!({"msg": "hi"}),
            &Value::Null,
            &mem,
        );
        assert_eq!(out, "{{input.msg}}", "substituted text must not be re-expanded");
    }

    #[test]
    fn multiple_tokens_replaced_left_to_right() {
        let out = TemplateRenderer::render(
            "{{input.a}}-{{input.b}}",
            &json!({"a": "1", "b": "2"}),
            &Value::Null,
            &HashMap::new(),
        );
        assert_eq!(out, "1-2");
    }

    #[test]
    fn no_tokens_returns_template_unchanged() {
        let out = TemplateRenderer::render("plain text", &Value::Null, &Value::Null, &HashMap::new());
        assert_eq!(out, "plain text");
    }
}
