//! Email templates with `{{name}}` placeholders.
//!
//! Rendering is a single pass over the template: replacement text is never
//! re-scanned, so the output depends only on the template and the variable
//! map. Placeholders without a value stay in the output verbatim.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::model::NotificationType;

/// Slot that expands to one `<li>` per link.
pub const DYNAMIC_LINKS: &str = "dynamic_links";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// A link after token encoding, ready to be placed in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLink {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub subject: String,
    pub brief: String,
    /// HTML body.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub brief: String,
    pub html: String,
    /// Placeholder names that had no value.
    pub unresolved: BTreeSet<String>,
}

impl Template {
    pub fn new(subject: &str, brief: &str, body: &str) -> Self {
        Self {
            subject: subject.to_string(),
            brief: brief.to_string(),
            body: body.to_string(),
        }
    }

    /// Render subject, brief and body. Values placed in the HTML body are
    /// escaped; subject and brief are plain text.
    pub fn render(&self, vars: &BTreeMap<String, String>, links: &[RenderedLink]) -> RenderedEmail {
        let mut unresolved = BTreeSet::new();
        let subject = substitute(&self.subject, vars, None, &mut unresolved, false);
        let brief = substitute(&self.brief, vars, None, &mut unresolved, false);
        let list = links_html(links);
        let html = substitute(&self.body, vars, Some(&list), &mut unresolved, true);
        RenderedEmail {
            subject,
            brief,
            html,
            unresolved,
        }
    }
}

/// Substitute placeholders in plain text.
pub fn render_text(text: &str, vars: &BTreeMap<String, String>) -> String {
    substitute(text, vars, None, &mut BTreeSet::new(), false)
}

fn substitute(
    text: &str,
    vars: &BTreeMap<String, String>,
    links: Option<&str>,
    unresolved: &mut BTreeSet<String>,
    escape: bool,
) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            if name == DYNAMIC_LINKS {
                if let Some(list) = links {
                    return list.to_string();
                }
            }
            match vars.get(name) {
                Some(value) if escape => escape_html(value),
                Some(value) => value.clone(),
                None => {
                    unresolved.insert(name.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn links_html(links: &[RenderedLink]) -> String {
    links
        .iter()
        .map(|l| {
            format!(
                "<li><a href=\"{}\">{}</a></li>",
                escape_html(&l.url),
                escape_html(&l.name)
            )
        })
        .collect()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Wildcard subtype used as a per-type fallback.
const ANY_SUBTYPE: &str = "*";

/// Templates keyed by notification type and subtype.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: HashMap<(NotificationType, String), Template>,
}

impl TemplateSet {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Register a template. Use `"*"` as subtype for the type's fallback.
    pub fn insert(&mut self, notification_type: NotificationType, subtype: &str, template: Template) {
        self.templates
            .insert((notification_type, subtype.to_string()), template);
    }

    /// Exact subtype first, then the type's fallback.
    pub fn get(&self, notification_type: NotificationType, subtype: &str) -> Option<&Template> {
        self.templates
            .get(&(notification_type, subtype.to_string()))
            .or_else(|| {
                self.templates
                    .get(&(notification_type, ANY_SUBTYPE.to_string()))
            })
    }
}

fn page(greeting: &str, text: &str) -> String {
    format!(
        "<p>{greeting}</p><p>{text}</p><ul>{{{{dynamic_links}}}}</ul>\
         <p>Regards,<br/>Placement Cell</p>"
    )
}

impl Default for TemplateSet {
    fn default() -> Self {
        use NotificationType::*;

        let mut set = TemplateSet::empty();
        set.insert(
            Company,
            "added",
            Template::new(
                "{{company_full}} Has Been Added",
                "{{company_full}} is now open on the placement portal.",
                &page(
                    "Dear Student,",
                    "{{company_full}} has been added to the portal on {{updated_at}}.",
                ),
            ),
        );
        set.insert(
            Company,
            ANY_SUBTYPE,
            Template::new(
                "{{company_full}} Details Have Been Updated",
                "Details for {{company_full}} changed.",
                &page(
                    "Dear Student,",
                    "The details for {{company_full}} were updated on {{updated_at}}.",
                ),
            ),
        );
        set.insert(
            Content,
            ANY_SUBTYPE,
            Template::new(
                "{{company_full}} Content Has Been Updated",
                "New material is available for {{company_full}}.",
                &page(
                    "Dear Student,",
                    "Content for {{company_full}} was updated on {{updated_at}}.",
                ),
            ),
        );
        set.insert(
            Shortlist,
            ANY_SUBTYPE,
            Template::new(
                "Shortlist Published for {{company_full}} - {{role}}",
                "The {{role}} shortlist for {{company_full}} is out.",
                &page(
                    "Dear Student,",
                    "The shortlist for the {{role}} role at {{company_full}} was published on {{updated_at}}.",
                ),
            ),
        );
        set.insert(
            Prep,
            ANY_SUBTYPE,
            Template::new(
                "{{domain}} Preparation Material Updated",
                "Fresh {{domain}} preparation material is available.",
                &page(
                    "Dear Student,",
                    "Preparation material for {{domain}} was updated on {{updated_at}}.",
                ),
            ),
        );
        set.insert(
            Custom,
            ANY_SUBTYPE,
            Template::new("{{subject}}", "{{brief}}", &page("Hello,", "{{message}}")),
        );
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn content_subject() {
        let set = TemplateSet::default();
        let t = set.get(NotificationType::Content, "updated").unwrap();
        let out = t.render(
            &vars(&[("company_full", "ACME Corp"), ("updated_at", "18 Oct 2026")]),
            &[],
        );
        assert_eq!(out.subject, "ACME Corp Content Has Been Updated");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn missing_variable_left_verbatim() {
        let out = render_text("Hello {{name}}, see {{ missing }}", &vars(&[("name", "Asha")]));
        assert_eq!(out, "Hello Asha, see {{ missing }}");

        let t = Template::new("{{domain}} update", "", "");
        let out = t.render(&BTreeMap::new(), &[]);
        assert_eq!(out.subject, "{{domain}} update");
        assert_eq!(out.unresolved, BTreeSet::from(["domain".to_string()]));
    }

    #[test]
    fn rendering_is_idempotent_and_order_independent() {
        let text = "{{a}}-{{b}}-{{c}}";
        let forward = vars(&[("a", "1"), ("b", "2")]);
        let mut backward = BTreeMap::new();
        backward.insert("b".to_string(), "2".to_string());
        backward.insert("a".to_string(), "1".to_string());

        let once = render_text(text, &forward);
        assert_eq!(once, "1-2-{{c}}");
        assert_eq!(render_text(&once, &forward), once);
        assert_eq!(render_text(text, &backward), once);
    }

    #[test]
    fn values_are_not_rescanned() {
        let out = render_text("{{a}}", &vars(&[("a", "{{b}}"), ("b", "x")]));
        assert_eq!(out, "{{b}}");
    }

    #[test]
    fn dynamic_links_expand_to_list_items() {
        let t = Template::new("s", "b", "<ul>{{dynamic_links}}</ul>");
        let links = vec![
            RenderedLink {
                name: "Company Videos".into(),
                url: "https://p.example/dashboard?auth=abc".into(),
            },
            RenderedLink {
                name: "Q&A".into(),
                url: "https://p.example/dashboard?auth=def".into(),
            },
        ];
        let out = t.render(&BTreeMap::new(), &links);
        assert_eq!(
            out.html,
            "<ul><li><a href=\"https://p.example/dashboard?auth=abc\">Company Videos</a></li>\
             <li><a href=\"https://p.example/dashboard?auth=def\">Q&amp;A</a></li></ul>"
        );
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn body_values_escaped_subject_not() {
        let t = Template::new("{{company_full}}", "", "<p>{{company_full}}</p>");
        let out = t.render(&vars(&[("company_full", "Smith & <Sons>")]), &[]);
        assert_eq!(out.subject, "Smith & <Sons>");
        assert_eq!(out.html, "<p>Smith &amp; &lt;Sons&gt;</p>");
    }

    #[test]
    fn subtype_fallback() {
        let set = TemplateSet::default();
        let added = set.get(NotificationType::Company, "added").unwrap();
        let other = set.get(NotificationType::Company, "renamed").unwrap();
        assert_ne!(added.subject, other.subject);
        assert!(TemplateSet::empty().get(NotificationType::Prep, "x").is_none());
    }
}
