/// The model used when none is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// The sampling temperature used when none is configured.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Builder for [`GenerationConfig`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationConfigBuilder {
    model: Option<String>,
    system_instruction: Option<String>,
    temperature: Option<f32>,
}

impl GenerationConfigBuilder {
    /// Creates a builder with every setting left to its default.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model identifier.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the system instruction sent along with every request.
    #[inline]
    pub fn with_system_instruction<S: Into<String>>(
        mut self,
        instruction: S,
    ) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Sets the sampling temperature.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> GenerationConfig {
        GenerationConfig {
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            system_instruction: self.system_instruction,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        }
    }
}

/// Settings that shape how the model generates a reply.
///
/// A conversation keeps one configuration for its whole lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationConfig {
    /// The model identifier, e.g. `gemini-2.5-flash`.
    pub model: String,
    /// The system instruction, if any.
    pub system_instruction: Option<String>,
    /// The sampling temperature.
    pub temperature: f32,
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        GenerationConfigBuilder::new().build()
    }
}
