use std::sync::Arc;

use thiserror::Error;

use super::{
    CognitivePersona, ComparativeThinker, DetailAnalyst, ExpertSkeptic, Globalizer,
    HistoricalResearcher, RealitySkepticalist, TemporalContext,
};

/// Validation failures for dynamic persona registration.
#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("persona '{0}' is already registered")]
    DuplicateName(String),

    #[error("persona '{0}' not found")]
    NotFound(String),

    #[error("persona '{name}' has invalid weight {weight}; must be within [0.0, 2.0]")]
    InvalidWeight { name: String, weight: f32 },

    #[error("persona '{0}' has an empty or too-short focus (minimum 10 characters)")]
    InvalidFocus(String),

    #[error("persona name must not be empty")]
    EmptyName,
}

/// Holds the active personas in registration order.
///
/// Registration order matters: it breaks ties when two personas produce
/// the same normalized query.
pub struct PersonaRegistry {
    personas: Vec<Arc<dyn CognitivePersona>>,
}

impl PersonaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            personas: Vec::new(),
        }
    }

    /// Registry preloaded with the seven built-in personas.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExpertSkeptic)).unwrap();
        registry.register(Arc::new(DetailAnalyst)).unwrap();
        registry.register(Arc::new(HistoricalResearcher)).unwrap();
        registry.register(Arc::new(ComparativeThinker)).unwrap();
        registry.register(Arc::new(TemporalContext)).unwrap();
        registry.register(Arc::new(Globalizer)).unwrap();
        registry.register(Arc::new(RealitySkepticalist)).unwrap();
        registry
    }

    /// Register a persona after validating name, focus and weight.
    pub fn register(&mut self, persona: Arc<dyn CognitivePersona>) -> Result<(), RegistryError> {
        Self::validate(persona.as_ref())?;
        if self.personas.iter().any(|p| p.name() == persona.name()) {
            return Err(RegistryError::DuplicateName(persona.name().to_string()));
        }
        self.personas.push(persona);
        Ok(())
    }

    /// Remove a persona by name.
    pub fn unregister(&mut self, name: &str) -> Result<(), RegistryError> {
        let before = self.personas.len();
        self.personas.retain(|p| p.name() != name);
        if self.personas.len() == before {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    fn validate(persona: &dyn CognitivePersona) -> Result<(), RegistryError> {
        if persona.name().trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if persona.focus().trim().len() < 10 {
            return Err(RegistryError::InvalidFocus(persona.name().to_string()));
        }
        let weight = persona.weight();
        if !(0.0..=2.0).contains(&weight) || !weight.is_finite() {
            return Err(RegistryError::InvalidWeight {
                name: persona.name().to_string(),
                weight,
            });
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.personas.iter().any(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.name().to_string()).collect()
    }

    /// Personas in registration order.
    pub fn personas(&self) -> &[Arc<dyn CognitivePersona>] {
        &self.personas
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::QueryContext;
    use crate::types::SerpQuery;

    struct TestPersona {
        name: &'static str,
        focus: &'static str,
        weight: f32,
    }

    impl CognitivePersona for TestPersona {
        fn name(&self) -> &str {
            self.name
        }
        fn focus(&self) -> &str {
            self.focus
        }
        fn weight(&self) -> f32 {
            self.weight
        }
        fn expand(&self, original: &str, _ctx: &QueryContext) -> SerpQuery {
            SerpQuery::new(original)
        }
    }

    fn persona(name: &'static str, weight: f32) -> Arc<dyn CognitivePersona> {
        Arc::new(TestPersona {
            name,
            focus: "a sufficiently long focus",
            weight,
        })
    }

    #[test]
    fn defaults_register_seven() {
        let registry = PersonaRegistry::with_defaults();
        assert_eq!(registry.len(), 7);
        for name in [
            "Expert Skeptic",
            "Detail Analyst",
            "Historical Researcher",
            "Comparative Thinker",
            "Temporal Context",
            "Globalizer",
            "Reality Skepticalist",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = PersonaRegistry::new();
        registry.register(persona("Dup", 1.0)).unwrap();
        let err = registry.register(persona("Dup", 1.0)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateName("Dup".into()));
    }

    #[test]
    fn rejects_invalid_weight() {
        let mut registry = PersonaRegistry::new();
        assert!(matches!(
            registry.register(persona("Heavy", 2.5)),
            Err(RegistryError::InvalidWeight { .. })
        ));
        assert!(matches!(
            registry.register(persona("Negative", -0.1)),
            Err(RegistryError::InvalidWeight { .. })
        ));
        // Boundaries are inclusive
        registry.register(persona("Zero", 0.0)).unwrap();
        registry.register(persona("Two", 2.0)).unwrap();
    }

    #[test]
    fn rejects_short_focus() {
        let mut registry = PersonaRegistry::new();
        let bad: Arc<dyn CognitivePersona> = Arc::new(TestPersona {
            name: "Terse",
            focus: "short",
            weight: 1.0,
        });
        assert_eq!(
            registry.register(bad).unwrap_err(),
            RegistryError::InvalidFocus("Terse".into())
        );
    }

    #[test]
    fn unregister_by_name() {
        let mut registry = PersonaRegistry::with_defaults();
        registry.unregister("Globalizer").unwrap();
        assert_eq!(registry.len(), 6);
        assert!(!registry.contains("Globalizer"));
        assert_eq!(
            registry.unregister("Globalizer").unwrap_err(),
            RegistryError::NotFound("Globalizer".into())
        );
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = PersonaRegistry::new();
        registry.register(persona("B", 1.0)).unwrap();
        registry.register(persona("A", 1.0)).unwrap();
        assert_eq!(registry.names(), vec!["B", "A"]);
    }
}
