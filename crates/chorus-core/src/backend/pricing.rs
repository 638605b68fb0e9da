//! Static pricing lookups

/// USD per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input: f64,
    pub output: f64,
}

impl ModelRates {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input + (output_tokens as f64 / 1000.0) * self.output
    }
}

const OPENAI_RATES: &[(&str, ModelRates)] = &[
    ("gpt-4o", ModelRates::new(0.0025, 0.01)),
    ("gpt-4o-mini", ModelRates::new(0.00015, 0.0006)),
    ("gpt-4", ModelRates::new(0.03, 0.06)),
    ("gpt-3.5-turbo", ModelRates::new(0.001, 0.002)),
    ("o1", ModelRates::new(0.015, 0.06)),
    ("o1-mini", ModelRates::new(0.003, 0.012)),
    ("o3-mini", ModelRates::new(0.003, 0.012)),
];

const FALLBACK_INPUT_RATE: f64 = 0.0025;
const FALLBACK_OUTPUT_RATE: f64 = 0.01;

/// Strip a reasoning-effort suffix (`-low`, `-medium`, `-high`)
pub(crate) fn split_effort(model: &str) -> (&str, Option<&'static str>) {
    for effort in ["low", "medium", "high"] {
        if let Some(base) = model.strip_suffix(effort).and_then(|m| m.strip_suffix('-')) {
            return (base, Some(effort));
        }
    }
    (model, None)
}

/// Rates for unknown models, overridable via environment
fn fallback_rates() -> ModelRates {
    let read = |var: &str, default: f64| {
        std::env::var(var)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    };
    ModelRates::new(
        read("FALLBACK_INPUT_RATE", FALLBACK_INPUT_RATE),
        read("FALLBACK_OUTPUT_RATE", FALLBACK_OUTPUT_RATE),
    )
}

/// Estimated OpenAI cost in USD
pub fn openai_cost(input_tokens: u64, output_tokens: u64, model: &str) -> f64 {
    let (base, _) = split_effort(model);
    if let Some((_, rates)) = OPENAI_RATES.iter().find(|(name, _)| *name == base) {
        return rates.cost(input_tokens, output_tokens);
    }

    let rates = fallback_rates();
    tracing::warn!(
        model,
        input_rate = rates.input,
        output_rate = rates.output,
        "using fallback pricing for unknown model; set FALLBACK_INPUT_RATE and FALLBACK_OUTPUT_RATE to override"
    );
    rates.cost(input_tokens, output_tokens)
}
