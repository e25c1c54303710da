use crate::stability::TextPrompt;

/// Blends two prompts linearly over `steps` images.
///
/// Step `i` weights the start prompt by `1 - t` and the end prompt by `t`,
/// with `t = i / (steps - 1)`. Zero-weight prompts are left out since the
/// image endpoint rejects them.
pub fn interpolate(start: &str, end: &str, steps: usize) -> Vec<Vec<TextPrompt>> {
    (0..steps)
        .map(|i| {
            let t = if steps > 1 {
                i as f32 / (steps - 1) as f32
            } else {
                0.0
            };
            [(start, 1.0 - t), (end, t)]
                .into_iter()
                .filter(|(_, weight)| *weight > 0.0)
                .map(|(text, weight)| TextPrompt {
                    text: text.to_string(),
                    weight,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_pure_prompts() {
        let steps = interpolate("dawn", "dusk", 5);
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0], vec![TextPrompt::new("dawn")]);
        assert_eq!(steps[4], vec![TextPrompt::new("dusk")]);
    }

    #[test]
    fn midpoint_is_an_even_blend() {
        let steps = interpolate("dawn", "dusk", 3);
        assert_eq!(
            steps[1],
            vec![
                TextPrompt {
                    text: "dawn".into(),
                    weight: 0.5,
                },
                TextPrompt {
                    text: "dusk".into(),
                    weight: 0.5,
                },
            ]
        );
    }

    #[test]
    fn weights_always_sum_to_one() {
        for step in interpolate("a", "b", 7) {
            let total: f32 = step.iter().map(|p| p.weight).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn single_step_uses_start_prompt() {
        assert_eq!(interpolate("a", "b", 1), vec![vec![TextPrompt::new("a")]]);
        assert!(interpolate("a", "b", 0).is_empty());
    }
}
