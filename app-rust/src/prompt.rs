/// Placeholder replaced by the focus block, or removed when the user gave no
/// instruction.
const FOCUS_PLACEHOLDER: &str = "{{focus}}";

const VISUALIZATION_PROMPT: &str = r#"You are a distinguished technical communicator and an expert in 3D data visualization.

GOAL
The attached PDF is a research paper. Build an interactive 3D simulation that teaches how the system described in the paper works.

{{focus}}

FAILURE MODES
- Generic "sci-fi" art that carries no information is a failure.
- Abstract clouds of nodes are only acceptable when they stand for a vector space the paper describes.
- A visual that looks impressive but does not explain the paper's mechanism is a failure.

1. REASONING
Use your thinking budget to answer:
- Title: the exact title of the paper.
- State: what the system holds (e.g. main context versus external memory).
- Process: how data moves through the system.
- Constraint: the limit the design works around (e.g. a fixed context window).
Map each concept to a concrete 3D object. A limited buffer should look like a container with limited capacity that visibly overflows or evicts.

2. VISUALIZATION
Produce a SINGLE self-contained HTML file using Three.js v0.160.0 that simulates the paper's core logic:
- Build the architecture as a 3D scene rather than a flat diagram.
- Animate particles for tokens, tensors or signals to show how information travels.
- Label every component with absolutely positioned HTML overlays.
- On hover or click, show a tooltip explaining the component's role in this paper.

3. STYLE
Clean, modern and diagrammatic. Dark background (#050508); grid floors are fine for reference. Use bloom only to highlight active processing.

4. TECHNICAL SETUP
Load Three.js through an import map:
<script type="importmap">
  {
    "imports": {
      "three": "https://unpkg.com/three@0.160.0/build/three.module.js",
      "three/addons/": "https://unpkg.com/three@0.160.0/examples/jsm/"
    }
  }
</script>
Import OrbitControls, EffectComposer and other addons as needed. Add an HTML sidebar or bottom panel acting as a live system log or legend that describes the simulation state.

5. OUTPUT
Return a JSON object with:
- "title": the extracted paper title.
- "html": the raw HTML document.

Do not just show the object. Show how it works: simulate the mechanism described in the PDF."#;

/// Build the instruction text sent next to the document. The user's focus
/// instruction is interpolated in exactly one place.
#[must_use]
pub fn build_visualization_prompt(instruction: &str) -> String {
    let instruction = instruction.trim();
    let focus = if instruction.is_empty() {
        String::new()
    } else {
        format!(
            "*** CRITICAL USER INSTRUCTION ***: The user wants you to focus specifically on: \
             \"{instruction}\". Make sure the visualization highlights this aspect."
        )
    };

    VISUALIZATION_PROMPT.replacen(FOCUS_PLACEHOLDER, &focus, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_focus_once() {
        let prompt = build_visualization_prompt("  highlight the caching layer ");
        assert_eq!(prompt.matches("highlight the caching layer").count(), 1);
        assert!(prompt.contains("focus specifically on: \"highlight the caching layer\""));
        assert!(!prompt.contains(FOCUS_PLACEHOLDER));
    }

    #[test]
    fn blank_instruction_omits_focus_block() {
        let prompt = build_visualization_prompt("   ");
        assert!(!prompt.contains("CRITICAL USER INSTRUCTION"));
        assert!(!prompt.contains(FOCUS_PLACEHOLDER));
        assert!(prompt.contains("\"html\""));
    }
}
