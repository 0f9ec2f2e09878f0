//! Binding resolution - button config + entity state → rendering parameters
//!
//! Resolution is a pure function of (button, entity state, pressed). It is
//! re-run in full for every render, never patched incrementally.

mod template;

use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::config::ButtonSpec;
use crate::render::{IconSource, RenderParams};
use crate::state::{EntityState, StateStore};

pub use template::{is_template, JinjaTemplates, TemplateEngine};

/// Label color when nothing else applies
pub const DEFAULT_TEXT_COLOR: &str = "white";
/// Label color of a bound entity whose state is "on"
pub const HIGHLIGHT_TEXT_COLOR: &str = "orangered";
/// Label color while the key is held down
pub const PRESSED_TEXT_COLOR: &str = "green";

/// Built-in icon per domain, used when a bound button configures no icon
pub fn default_mdi_icon(domain: &str) -> Option<&'static str> {
    match domain {
        "light" => Some("lightbulb"),
        "switch" => Some("power-socket-eu"),
        _ => None,
    }
}

/// Computes what a key should show
#[derive(Clone)]
pub struct BindingResolver {
    templates: Arc<dyn TemplateEngine>,
}

impl BindingResolver {
    pub fn new(templates: Arc<dyn TemplateEngine>) -> Self {
        Self { templates }
    }

    /// Resolve against the current content of the store
    pub fn resolve_in(&self, button: &ButtonSpec, store: &StateStore, pressed: bool) -> RenderParams {
        let state = button.entity_id.as_deref().and_then(|id| store.get(id));
        self.resolve(button, state.as_ref(), pressed)
    }

    /// Resolve a button given its entity's state (None when unbound or unknown)
    pub fn resolve(&self, button: &ButtonSpec, state: Option<&EntityState>, pressed: bool) -> RenderParams {
        let static_icon = button
            .icon
            .as_ref()
            .map(|path| IconSource::File(path.clone()))
            .or_else(|| button.icon_mdi.clone().map(IconSource::Mdi));

        let (text, text_color, icon) = match state {
            None => (
                button.text.clone(),
                button
                    .text_color
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TEXT_COLOR.to_string()),
                static_icon,
            ),
            Some(state) => {
                let context = json!({ "state": state.to_value() });
                let text = self.render_template(&button.text, &context);
                let text_color = match &button.text_color {
                    Some(template) => self.render_template(template, &context),
                    None if state.is_on() => HIGHLIGHT_TEXT_COLOR.to_string(),
                    None => DEFAULT_TEXT_COLOR.to_string(),
                };
                let icon = static_icon.or_else(|| {
                    button
                        .domain()
                        .and_then(default_mdi_icon)
                        .map(|name| IconSource::Mdi(name.to_string()))
                });
                (text, text_color, icon)
            }
        };

        RenderParams {
            text,
            text_color: if pressed {
                PRESSED_TEXT_COLOR.to_string()
            } else {
                text_color
            },
            icon,
            text_size: button.text_size,
        }
    }

    /// Evaluate a template, falling back to its literal text on error
    fn render_template(&self, template: &str, context: &serde_json::Value) -> String {
        match self.templates.evaluate(template, context) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Template evaluation failed, showing literal text: {}", e);
                template.to_string()
            }
        }
    }
}

impl Default for BindingResolver {
    fn default() -> Self {
        Self::new(Arc::new(JinjaTemplates::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn bound(entity_id: &str, text: &str) -> ButtonSpec {
        ButtonSpec {
            entity_id: Some(entity_id.to_string()),
            text: text.to_string(),
            ..ButtonSpec::default()
        }
    }

    #[test]
    fn test_bound_button_renders_template_and_default_color() {
        let resolver = BindingResolver::default();
        let store = StateStore::from_snapshot(vec![EntityState::new("light.x", "off")]);

        let params = resolver.resolve_in(&bound("light.x", "{{ state.state }}"), &store, false);
        assert_eq!(params.text, "off");
        assert_eq!(params.text_color, DEFAULT_TEXT_COLOR);

        store.upsert(EntityState::new("light.x", "on"));
        let params = resolver.resolve_in(&bound("light.x", "{{ state.state }}"), &store, false);
        assert_eq!(params.text, "on");
        assert_eq!(params.text_color, HIGHLIGHT_TEXT_COLOR);
    }

    #[test]
    fn test_color_template_overrides_highlight() {
        let resolver = BindingResolver::default();
        let state = EntityState::new("light.x", "on").with_attribute("color", json!("blue"));
        let button = ButtonSpec {
            text_color: Some("{{ state.attributes.color }}".into()),
            ..bound("light.x", "Lamp")
        };

        let params = resolver.resolve(&button, Some(&state), false);
        assert_eq!(params.text, "Lamp");
        assert_eq!(params.text_color, "blue");
    }

    #[test]
    fn test_unknown_entity_renders_literal_text() {
        let resolver = BindingResolver::default();
        let button = ButtonSpec {
            text_color: Some("{{ 'red' }}".into()),
            ..bound("light.missing", "{{ state.state }}")
        };
        let store = StateStore::from_snapshot(vec![EntityState::new("light.other", "on")]);

        let params = resolver.resolve_in(&button, &store, false);
        assert_eq!(params.text, "{{ state.state }}");
        assert_eq!(params.text_color, "{{ 'red' }}");
        assert_eq!(params.icon, None, "no domain default without state");
    }

    #[test]
    fn test_static_button_independent_of_store() {
        let resolver = BindingResolver::default();
        let button = ButtonSpec {
            service: Some("script.good_night".into()),
            text: "Night".into(),
            ..ButtonSpec::default()
        };

        let empty = resolver.resolve_in(&button, &StateStore::new(), false);
        let full = resolver.resolve_in(
            &button,
            &StateStore::from_snapshot(vec![EntityState::new("script.good_night", "on")]),
            false,
        );
        assert_eq!(empty, full);
        assert_eq!(empty.text, "Night");
        assert_eq!(empty.text_color, DEFAULT_TEXT_COLOR);
    }

    #[test]
    fn test_pressed_overrides_color() {
        let resolver = BindingResolver::default();
        let on = EntityState::new("light.x", "on");
        let button = ButtonSpec {
            text_color: Some("blue".into()),
            ..bound("light.x", "X")
        };

        assert_eq!(resolver.resolve(&button, Some(&on), true).text_color, PRESSED_TEXT_COLOR);
        assert_eq!(resolver.resolve(&button, None, true).text_color, PRESSED_TEXT_COLOR);
        assert_eq!(resolver.resolve(&ButtonSpec::default(), None, true).text_color, PRESSED_TEXT_COLOR);
    }

    #[test]
    fn test_resolution_is_pure() {
        let resolver = BindingResolver::default();
        let state = EntityState::new("light.x", "on").with_attribute("brightness", json!(12));
        let button = bound("light.x", "{{ state.attributes.brightness }}");

        let first = resolver.resolve(&button, Some(&state), false);
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&button, Some(&state), false), first);
        }
    }

    #[test]
    fn test_domain_default_icons() {
        let resolver = BindingResolver::default();
        let cases = [
            ("light.kitchen", Some(IconSource::Mdi("lightbulb".into()))),
            ("switch.fan", Some(IconSource::Mdi("power-socket-eu".into()))),
            ("script.foo", None),
        ];

        for (entity_id, expected) in cases {
            let state = EntityState::new(entity_id, "off");
            let params = resolver.resolve(&bound(entity_id, ""), Some(&state), false);
            assert_eq!(params.icon, expected, "icon for {}", entity_id);
        }
    }

    #[test]
    fn test_service_domain_drives_default_icon() {
        let resolver = BindingResolver::default();
        let state = EntityState::new("sensor.x", "on");
        let button = ButtonSpec {
            service: Some("light.toggle".into()),
            ..bound("sensor.x", "")
        };
        assert_eq!(
            resolver.resolve(&button, Some(&state), false).icon,
            Some(IconSource::Mdi("lightbulb".into()))
        );
    }

    #[test]
    fn test_explicit_icons_suppress_default() {
        let resolver = BindingResolver::default();
        let state = EntityState::new("light.kitchen", "on");

        let mdi = ButtonSpec {
            icon_mdi: Some("ceiling-light".into()),
            ..bound("light.kitchen", "")
        };
        assert_eq!(
            resolver.resolve(&mdi, Some(&state), false).icon,
            Some(IconSource::Mdi("ceiling-light".into()))
        );

        let file = ButtonSpec {
            icon: Some(PathBuf::from("icons/lamp.png")),
            icon_mdi: Some("ceiling-light".into()),
            ..bound("light.kitchen", "")
        };
        assert_eq!(
            resolver.resolve(&file, Some(&state), false).icon,
            Some(IconSource::File(PathBuf::from("icons/lamp.png")))
        );
    }

    #[test]
    fn test_broken_template_falls_back_to_literal() {
        let resolver = BindingResolver::default();
        let state = EntityState::new("light.x", "on");
        let params = resolver.resolve(&bound("light.x", "{{ state.state "), Some(&state), false);
        assert_eq!(params.text, "{{ state.state ");
    }

    #[test]
    fn test_text_size_carried() {
        let resolver = BindingResolver::default();
        let button = ButtonSpec {
            text_size: 20,
            ..ButtonSpec::default()
        };
        assert_eq!(resolver.resolve(&button, None, false).text_size, 20);
    }
}
