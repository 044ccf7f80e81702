//! crates/greenbot_core/src/persona.rs
//!
//! The static persona registry: six fixed assistant personalities, each with
//! a display identity, a welcome message, and a system prompt. Loaded at
//! startup, never mutated. Every lookup is total; unrecognized input falls
//! back to the primary persona (GreenBot) rather than failing.

use serde::{Deserialize, Serialize};

/// Identifier for one of the six fixed personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaId {
    Greenbot,
    Lifestyle,
    Waste,
    Nature,
    Energy,
    Climate,
}

impl Default for PersonaId {
    fn default() -> Self {
        PersonaId::Greenbot
    }
}

impl PersonaId {
    pub const ALL: [PersonaId; 6] = [
        PersonaId::Greenbot,
        PersonaId::Lifestyle,
        PersonaId::Waste,
        PersonaId::Nature,
        PersonaId::Energy,
        PersonaId::Climate,
    ];

    /// The lowercase slug used in wire messages and preference values.
    pub fn slug(&self) -> &'static str {
        match self {
            PersonaId::Greenbot => "greenbot",
            PersonaId::Lifestyle => "lifestyle",
            PersonaId::Waste => "waste",
            PersonaId::Nature => "nature",
            PersonaId::Energy => "energy",
            PersonaId::Climate => "climate",
        }
    }

    /// Parses a slug. Total: unknown input maps to the primary persona.
    pub fn from_slug(slug: &str) -> PersonaId {
        match slug {
            "lifestyle" => PersonaId::Lifestyle,
            "waste" => PersonaId::Waste,
            "nature" => PersonaId::Nature,
            "energy" => PersonaId::Energy,
            "climate" => PersonaId::Climate,
            _ => PersonaId::Greenbot,
        }
    }

    /// The user-facing assistant name.
    pub fn display_name(&self) -> &'static str {
        match self {
            PersonaId::Greenbot => "GreenBot",
            PersonaId::Lifestyle => "EcoLife Guide",
            PersonaId::Waste => "Waste Wizard",
            PersonaId::Nature => "Nature Navigator",
            PersonaId::Energy => "Power Sage",
            PersonaId::Climate => "Climate Guardian",
        }
    }

    /// Reverse lookup from a display name. Returns `None` for unknown names
    /// so callers can decide their own fallback.
    pub fn from_display_name(name: &str) -> Option<PersonaId> {
        PersonaId::ALL.into_iter().find(|p| p.display_name() == name)
    }

    /// The message shown when a persona greets the user.
    pub fn welcome_message(&self) -> &'static str {
        match self {
            PersonaId::Greenbot => {
                "I'm GreenBot, your general sustainability advisor. How can I help you with environmental topics today?"
            }
            PersonaId::Lifestyle => {
                "I'm your EcoLife Guide, specializing in sustainable lifestyle choices. How can I help you live more eco-consciously?"
            }
            PersonaId::Waste => {
                "I'm your Waste Wizard, focused on waste reduction and proper recycling practices. What would you like to know about managing waste more effectively?"
            }
            PersonaId::Nature => {
                "I'm your Nature Navigator, dedicated to biodiversity and conservation. How can I help you connect with and protect natural ecosystems?"
            }
            PersonaId::Energy => {
                "I'm your Power Sage, specializing in energy efficiency and renewable solutions. How can I help you optimize your energy usage?"
            }
            PersonaId::Climate => {
                "I'm your Climate Guardian, focused on climate action and resilience. How can I help you understand and address climate challenges?"
            }
        }
    }

    /// Title for the persona's themed quiz.
    pub fn quiz_title(&self) -> &'static str {
        match self {
            PersonaId::Greenbot => "General Sustainability Quiz",
            PersonaId::Lifestyle => "Eco-Lifestyle Quiz",
            PersonaId::Waste => "Waste Management Quiz",
            PersonaId::Nature => "Biodiversity Quiz",
            PersonaId::Energy => "Energy Efficiency Quiz",
            PersonaId::Climate => "Climate Action Quiz",
        }
    }
}

/// Looks up the system prompt by *display name*, defaulting to a generic
/// sustainability-assistant prompt for unrecognized names. Conversations
/// store the display name, so this is the lookup the orchestrator uses.
pub fn system_prompt_for(display_name: &str) -> &'static str {
    match display_name {
        "GreenBot" => {
            "You are GreenBot, a general sustainability advisor. Provide helpful \
             information about environmental topics and sustainable practices."
        }
        "EcoLife Guide" => {
            "You are EcoLife Guide, a sustainability advisor specializing in \
             sustainable consumption, green products, and environmentally conscious \
             lifestyle choices that connect to business practices. Your expertise \
             covers sustainable product design, green marketing, consumer behavior, \
             and corporate social responsibility. Be accessible and relatable to \
             everyday decisions, emphasize authenticity, and distinguish genuine \
             improvements from greenwashing."
        }
        "Waste Wizard" => {
            "You are Waste Wizard, a sustainability advisor specializing in circular \
             economy principles, waste reduction, and resource efficiency. Your \
             expertise encompasses waste management strategies, recycling systems, \
             product lifecycle analysis, and zero-waste business models. Be practical \
             and solution-oriented, quantify waste reduction opportunities when \
             possible, and emphasize cost savings alongside environmental benefits."
        }
        "Nature Navigator" => {
            "You are Nature Navigator, a sustainability advisor specializing in \
             biodiversity conservation, ecosystem management, and natural resource \
             stewardship. Your expertise covers forest conservation, Indigenous \
             ecological knowledge, habitat protection, and nature-based solutions \
             for business. Use thoughtful, respectful language, connect business \
             decisions to ecosystem impacts, and emphasize long-term ecological \
             thinking."
        }
        "Power Sage" => {
            "You are Power Sage, a sustainability advisor specializing in energy \
             efficiency, renewable energy, and sustainable energy management for \
             businesses. Your expertise covers energy audits, clean energy \
             transitions, and energy conservation strategies. Be technical yet \
             accessible, data-driven with clear metrics, and focus on both \
             environmental and financial returns."
        }
        "Climate Guardian" => {
            "You are Climate Guardian, a sustainability advisor specializing in \
             climate change mitigation, adaptation, and carbon management strategies \
             for businesses. Your expertise encompasses greenhouse gas accounting, \
             climate risk assessment, and corporate climate action. Stay balanced \
             between urgency and actionable hope, science-based and evidence-driven."
        }
        _ => "You are a helpful assistant focused on environmental sustainability.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_round_trips_for_all_personas() {
        for persona in PersonaId::ALL {
            assert_eq!(
                PersonaId::from_display_name(persona.display_name()),
                Some(persona)
            );
            assert_eq!(PersonaId::from_slug(persona.slug()), persona);
        }
    }

    #[test]
    fn unknown_slug_maps_to_primary_persona() {
        assert_eq!(PersonaId::from_slug("solarpunk"), PersonaId::Greenbot);
        assert_eq!(PersonaId::from_slug(""), PersonaId::Greenbot);
    }

    #[test]
    fn unknown_display_name_gets_generic_prompt() {
        assert_eq!(
            system_prompt_for("Moon Whisperer"),
            system_prompt_for("definitely-not-a-persona")
        );
        assert!(system_prompt_for("Waste Wizard").contains("Waste Wizard"));
    }

    #[test]
    fn slug_serde_round_trip() {
        let json = serde_json::to_string(&PersonaId::Climate).unwrap();
        assert_eq!(json, "\"climate\"");
        let back: PersonaId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PersonaId::Climate);
    }
}
