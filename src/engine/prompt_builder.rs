use crate::model::game_state::{Language, SubjectDescriptor};

/// Builds the text sent to the LLM.
/// Formatting only: no parsing, no networking, no engine logic.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Standing instruction for the whole session.
    pub fn system_instruction(role: &str, language: Language) -> String {
        let mut prompt = String::new();

        push_host_role(&mut prompt, role);
        push_stability_rules(&mut prompt);
        push_narrative_rules(&mut prompt);
        push_ending_rules(&mut prompt);
        push_output_format(&mut prompt, language);

        prompt
    }

    /// First message of a session: asks for the briefing and opening scene.
    pub fn intro_request(subject: &SubjectDescriptor, role: &str, language: Language) -> String {
        let mut prompt = String::new();

        prompt.push_str("GAME SETUP:\n");
        prompt.push_str(&format!("- Player role: {}\n", role));
        prompt.push_str(&format!("- Subject: {}", subject.designation));
        if !subject.name.trim().is_empty() {
            prompt.push_str(&format!(" ({})", subject.name.trim()));
        }
        prompt.push('\n');
        prompt.push_str(&format!("- Object class: {}\n", subject.containment_class));
        if let Some(description) = subject.description.as_deref().filter(|d| !d.trim().is_empty()) {
            prompt.push_str(&format!("- Known description: {}\n", description.trim()));
        }
        prompt.push_str("- Turn: 1\n\n");

        prompt.push_str(&format!(
            "Start the game now. In {}, write:\n\
- a short briefing on the subject (class, containment procedures, description)\n\
- a short introduction of the player's character\n\
- the opening scene for \"{}\" with the main objective, 200-300 words\n\
- two or three numbered starting options, plus \"Other (type your own)\"\n\
- [STABILITY: 100]\n\
- [VISUAL: <prompt>] (optional)\n",
            language_name(language),
            role
        ));

        prompt
    }

    /// Per-turn context wrapped around the player's action.
    pub fn turn_context(action: &str, stability: i32, turn: u32, language: Language) -> String {
        let mut prompt = String::new();

        prompt.push_str("[SYSTEM STATE]\n");
        prompt.push_str(&format!("Current Stability: {}%\n", stability));
        prompt.push_str(&format!("Turn: {}\n", turn));
        push_player_action(&mut prompt, action);
        prompt.push_str(&format!("Output Language: {}\n\n", language_name(language)));

        push_turn_reminder(&mut prompt, turn);

        prompt
    }
}

fn push_host_role(prompt: &mut String, role: &str) {
    prompt.push_str(
        "You are the host of a text adventure set in the SCP Foundation universe. \
Every player decision is a thread on a loom; small choices combine to shape \
where the world line goes. Stay faithful to the setting's internal logic.\n\n",
    );
    prompt.push_str(&format!("The player plays: {}\n", role));
    prompt.push_str(
        "Give the character a persona and background, filter all narration through \
their perspective and abilities, and build the story around one clear main objective.\n\n",
    );
}

fn push_stability_rules(prompt: &mut String) {
    prompt.push_str(
        "HUME FIELD STABILITY (0-100, starts at 100):\n\
- Natural decay: -2 to -5 per turn without special action.\n\
- Reckless actions, exposure, injury or panic: -10 to -20.\n\
- Logic, science, clearance or tools that stabilise the scene: +5 to +15 (never above 100).\n\
- Below 30 recovery becomes very hard, and harder as turns increase.\n\n\
Phases:\n\
1. Stable (100-70): set the scene, the atmosphere and the source of conflict.\n\
2. Fluctuating (69-30): conflict deepens, physics bends slightly.\n\
3. Critical (<30): reality breaks; offer one escape hatch (rarely a trap).\n\
4. Collapse (0): the world line ends.\n\n",
    );
}

fn push_narrative_rules(prompt: &mut String) {
    prompt.push_str(
        "Narrative Rules:\n\
- Offer several meaningful paths; avoid single dead ends.\n\
- Allow creative solutions that fit the character and the setting.\n\
- Collapse should follow from accumulated risk or one truly reckless act.\n\
- Reward analysis, decryption and exploiting the subject's behaviour.\n\n",
    );
}

fn push_ending_rules(prompt: &mut String) {
    prompt.push_str(
        "Endings:\n\
- CONTAINED: the character's core objective is achieved.\n\
- DEATH: the character dies or the mission fails irrecoverably.\n\
- ESCAPED: the character gets away, the anomaly may still be active.\n\
- COLLAPSE: only when Stability <= 0.\n\n",
    );
}

fn push_output_format(prompt: &mut String, language: Language) {
    prompt.push_str(&format!(
        "Output Format:\n\
1. Language: {}. Second person. Slow-burn horror in a calm, clinical register.\n\
2. About 250 words of narration.\n\
3. Three numbered options, plus a fourth: \"Other (type your own)\".\n\
4. System tags at the very end:\n\
   - [VISUAL: <English image prompt>] only when the scene changes significantly,\n\
     formatted as \"cinematic, scp foundation style, horror, dark, <scene details>\".\n\
   - [STABILITY: <integer>] always.\n\
   - [ENDING: <TYPE>] only when an ending is reached; TYPE is one of COLLAPSE, CONTAINED, DEATH, ESCAPED.\n\
Example: \"...you hear heavy breathing behind the door. [VISUAL: dark metal door, scratch marks][STABILITY: 85]\"\n",
        language_name(language)
    ));
}

fn push_player_action(prompt: &mut String, action: &str) {
    prompt.push_str("User Action: \"");
    prompt.push_str(action);
    prompt.push_str("\"\n");
}

fn push_turn_reminder(prompt: &mut String, turn: u32) {
    prompt.push_str(
        "TASK:\n\
1. Analyse the action and respond with narration (under 250 words), steering toward an ending.\n",
    );
    if turn >= 15 {
        prompt.push_str(
            "2. Turn 15 or later: converge the story, raise stability penalties sharply and make recovery much harder.\n",
        );
    }
    prompt.push_str(
        "- Decide whether an ending is reached; if so emit [ENDING: TYPE].\n\
- Otherwise give two or three numbered options plus \"Other (type your own)\".\n\
- If Stability <= 0 you MUST emit [ENDING: COLLAPSE].\n\
- Append [STABILITY: <new_value>].\n\
- Add [VISUAL: <prompt>] only for a major visual change.\n\
- Do not call any tools.\n",
    );
}

fn language_name(language: Language) -> &'static str {
    match language {
        Language::Zh => "Chinese",
        Language::En => "English",
    }
}
