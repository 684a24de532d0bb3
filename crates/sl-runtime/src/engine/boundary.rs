use sl_core::{ChoiceOption, ScriptLangError, ScriptNode};
use tracing::debug;

use super::once_state::option_once_key;
use super::*;

impl ScriptLangEngine {
    /// Options shown at a choice: regular options whose `when` holds and
    /// whose once-flag is unused. When none survive, the first fall-over
    /// option stands in if it is itself available.
    fn visible_choice_options<'o>(
        &mut self,
        script_name: &str,
        options: &'o [ChoiceOption],
    ) -> Result<Vec<&'o ChoiceOption>, ScriptLangError> {
        let mut visible = Vec::new();
        for option in options.iter().filter(|option| !option.fall_over) {
            if self.is_choice_option_available(script_name, option)? {
                visible.push(option);
            }
        }
        if !visible.is_empty() {
            return Ok(visible);
        }

        if let Some(fallback) = options.iter().find(|option| option.fall_over) {
            if self.is_choice_option_available(script_name, fallback)? {
                visible.push(fallback);
            }
        }
        Ok(visible)
    }

    fn is_choice_option_available(
        &mut self,
        script_name: &str,
        option: &ChoiceOption,
    ) -> Result<bool, ScriptLangError> {
        if option.once && self.has_once_state(script_name, &option_once_key(&option.id)) {
            return Ok(false);
        }
        match &option.when_expr {
            Some(expr) => self.eval_boolean(expr),
            None => Ok(true),
        }
    }

    /// Renders and freezes a choice boundary. Returns `None` when no option
    /// is visible, in which case the node has been skipped.
    pub(super) fn enter_choice(
        &mut self,
        script_name: &str,
        node_id: &str,
        prompt_template: Option<&str>,
        options: &[ChoiceOption],
    ) -> Result<Option<EngineOutput>, ScriptLangError> {
        let visible = self.visible_choice_options(script_name, options)?;
        if visible.is_empty() {
            debug!(node_id, "choice skipped, no visible options");
            self.bump_top_node_index(1)?;
            return Ok(None);
        }

        let mut items = Vec::with_capacity(visible.len());
        for (index, option) in visible.into_iter().enumerate() {
            items.push(ChoiceItem {
                index,
                id: option.id.clone(),
                text: self.render_text(&option.text)?,
            });
        }
        let prompt_text = match prompt_template {
            Some(template) => Some(self.render_text(template)?),
            None => None,
        };

        let pending = PendingChoice {
            frame_id: self.top_frame_id()?,
            node_id: node_id.to_string(),
            options: items,
            prompt_text,
        };
        let output = pending.output();
        debug!(node_id, items = pending.options.len(), "choice boundary");
        self.pending_choice = Some(pending);
        Ok(Some(output))
    }

    /// Commits the selection of a pending choice item and enters the chosen
    /// option's group. Everything is checked before any state changes.
    pub fn choose(&mut self, index: usize) -> Result<(), ScriptLangError> {
        let Some(pending) = &self.pending_choice else {
            return Err(ScriptLangError::new(
                "ENGINE_NO_PENDING_CHOICE",
                "No pending choice is available.",
            ));
        };
        let Some(item) = pending.options.get(index) else {
            return Err(ScriptLangError::new(
                "ENGINE_CHOICE_INDEX",
                format!("Choice index \"{}\" is out of range.", index),
            ));
        };
        let Some(frame_index) = self.find_frame_index(pending.frame_id) else {
            return Err(ScriptLangError::new(
                "ENGINE_CHOICE_FRAME_MISSING",
                "Frame owning the pending choice is gone.",
            ));
        };

        let frame = &self.frames[frame_index];
        let (script_name, group) = self.lookup_group(&frame.group_id)?;
        let option = match group.nodes.get(frame.node_index) {
            Some(ScriptNode::Choice { id, options, .. }) if *id == pending.node_id => {
                options.iter().find(|option| option.id == item.id)
            }
            _ => None,
        }
        .ok_or_else(|| {
            ScriptLangError::new(
                "ENGINE_CHOICE_NOT_FOUND",
                format!("Choice option \"{}\" not found.", item.id),
            )
        })?;

        let script_name = script_name.to_string();
        let option_id = option.id.clone();
        let group_id = option.group_id.clone();
        let once = option.once;
        self.lookup_group(&group_id)?;

        if once {
            self.mark_once_state(&script_name, option_once_key(&option_id));
        }
        self.frames.truncate(frame_index + 1);
        self.enter_child_group(&group_id, CompletionKind::ResumeAfterChild, true)?;
        self.pending_choice = None;
        debug!(option = %option_id, index, "choice selected");
        Ok(())
    }
}

#[cfg(test)]
mod boundary_tests {
    use sl_core::ScriptType;

    use super::super::runtime_test_support::*;
    use super::*;

    #[test]
    fn when_filter_and_indices_follow_visible_order() {
        let mut hidden = option("o1", "Hidden", "main.o1");
        hidden.when_expr = Some("gold > 10".to_string());
        let main = script("main")
            .root(vec![
                var("v1", "gold", ScriptType::number(), Some("3")),
                choice(
                    "c1",
                    Some("Gold: ${gold}"),
                    vec![hidden, option("o2", "Shop", "main.o2")],
                ),
            ])
            .group("main.o1", vec![text("t1", "rich")])
            .group("main.o2", vec![text("t2", "shop")])
            .build();
        let mut engine = started(vec![main]);
        let (items, prompt) = expect_choices(&mut engine);
        assert_eq!(prompt.as_deref(), Some("Gold: 3"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].index, 0);
        assert_eq!(items[0].id, "o2");
        assert!(engine.waiting_choice());

        engine.choose(0).expect("choose");
        assert!(!engine.waiting_choice());
        assert_eq!(expect_text(&mut engine), "shop");
        expect_end(&mut engine);
    }

    #[test]
    fn choose_validates_before_committing() {
        let main = script("main")
            .root(vec![choice(
                "c1",
                None,
                vec![option("o1", "A", "main.a"), option("o2", "B", "main.b")],
            )])
            .group("main.a", vec![text("t1", "picked a")])
            .group("main.b", vec![text("t2", "picked b")])
            .build();
        let mut engine = started(vec![main]);

        let error = engine.choose(0).expect_err("nothing pending yet");
        assert_eq!(error.code, "ENGINE_NO_PENDING_CHOICE");

        let (items, _) = expect_choices(&mut engine);
        assert_eq!(items.len(), 2);

        let error = engine.choose(2).expect_err("out of range");
        assert_eq!(error.code, "ENGINE_CHOICE_INDEX");
        assert!(engine.waiting_choice());

        engine.choose(1).expect("choose b");
        assert_eq!(expect_text(&mut engine), "picked b");
    }

    #[test]
    fn choose_revalidates_pending_item_against_the_choice_node() {
        let main = script("main")
            .root(vec![
                text("t0", "intro"),
                choice("c1", None, vec![option("o1", "A", "main.a")]),
            ])
            .group("main.a", vec![text("t1", "picked a")])
            .build();
        let mut engine = started(vec![main]);
        assert_eq!(expect_text(&mut engine), "intro");
        expect_choices(&mut engine);

        if let Some(pending) = engine.pending_choice.as_mut() {
            pending.options[0].id = "o9".to_string();
        }
        let error = engine.choose(0).expect_err("item no longer matches an option");
        assert_eq!(error.code, "ENGINE_CHOICE_NOT_FOUND");
        assert!(engine.waiting_choice());

        if let Some(pending) = engine.pending_choice.as_mut() {
            pending.options[0].id = "o1".to_string();
        }
        engine.frames[0].node_index = 0;
        let error = engine.choose(0).expect_err("cursor no longer at the choice");
        assert_eq!(error.code, "ENGINE_CHOICE_NOT_FOUND");
        assert!(engine.waiting_choice());
    }

    #[test]
    fn choose_rejects_option_group_that_does_not_exist() {
        let main = script("main")
            .root(vec![choice("c1", None, vec![option("o1", "A", "main.gone")])])
            .build();
        let mut engine = started(vec![main]);
        expect_choices(&mut engine);

        let error = engine.choose(0).expect_err("missing group");
        assert_eq!(error.code, "ENGINE_GROUP_NOT_FOUND");
        assert!(engine.waiting_choice());
    }
}
