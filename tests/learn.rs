use dom_session::{
	learn::{LearnState, SlotOutcome, SlotRegistry},
	widget::RenderFlags,
	Application, Configuration, Environment, Renderer, SlotId, SlotType, WidgetId,
};
use std::sync::Arc;

mod widgets_;
use widgets_::{app_with_texts, enable_logger, Text, ToggleHidden};

/// An application whose tree is already on the client: a button and a text.
fn rendered_app() -> (Renderer, Application, WidgetId, WidgetId) {
	enable_logger();
	let (mut app, ids) = app_with_texts(&["button", "text"]);
	let root = app.root();
	app.tree.create_element(root, &mut RenderFlags::default()).unwrap();

	let mut renderer = Renderer::new(Arc::new(Configuration::default()), Environment::default(), "learning");
	assert_eq!(renderer.collect_changes(&mut app).unwrap(), vec![]);
	renderer.set_rendered(true);
	(renderer, app, ids[0], ids[1])
}

#[test]
fn pre_learned_slot_is_replayed_without_diffing() {
	let (mut renderer, mut app, button, text) = rendered_app();
	let diffs = app.tree.get::<Text>(text).unwrap().diffs.clone();
	let slot = app.expose_stateless(Some(button), "click", ToggleHidden::new(text, SlotType::PreLearnStateless)).unwrap();

	let js = renderer.learn(&mut app, &slot).unwrap().unwrap();
	assert!(js.contains("e.style.display='none';"), "{}", js);
	assert_eq!(app.stateless_slots().state(&slot), Some(&LearnState::Learned(js.clone())));

	// The rehearsal was undone.
	assert!(!app.tree.get::<Text>(text).unwrap().hidden);
	assert_eq!(renderer.collect_changes(&mut app).unwrap(), vec![]);
	let diffs_after_learning = diffs.get();

	for _ in 0..2 {
		assert_eq!(renderer.trigger_stateless(&mut app, &slot).unwrap(), SlotOutcome::Cached(js.clone()));
	}
	assert_eq!(diffs.get(), diffs_after_learning);
	assert!(!renderer.is_pre_learning());
}

#[test]
fn pre_learning_leaves_the_application_untouched() {
	let (mut renderer, mut app, button, text) = rendered_app();
	let toggle = ToggleHidden::new(text, SlotType::PreLearnStateless);
	let triggered = toggle.triggered.clone();
	let slot = app.expose_stateless(Some(button), "click", toggle).unwrap();

	renderer.learn(&mut app, &slot).unwrap();
	assert_eq!(triggered.get(), 1);
	assert!(!app.tree.get::<Text>(text).unwrap().hidden);
	assert!(!app.has_after_load_javascript());
}

#[test]
fn incomplete_learning_falls_back_to_the_server() {
	let (mut renderer, mut app, button, text) = rendered_app();
	app.tree.get_mut::<Text>(text).unwrap().server_only = true;
	let toggle = ToggleHidden::new(text, SlotType::PreLearnStateless);
	let triggered = toggle.triggered.clone();
	let slot = app.expose_stateless(Some(button), "click", toggle).unwrap();

	assert_eq!(renderer.learn(&mut app, &slot).unwrap(), None);
	assert_eq!(app.stateless_slots().state(&slot), Some(&LearnState::Incomplete));

	assert_eq!(renderer.trigger_stateless(&mut app, &slot).unwrap(), SlotOutcome::ServerSide);
	assert_eq!(triggered.get(), 2);
	assert!(app.tree.get::<Text>(text).unwrap().hidden);
}

#[test]
fn auto_learned_slot_keeps_its_effect() {
	let (mut renderer, mut app, button, text) = rendered_app();
	let toggle = ToggleHidden::new(text, SlotType::AutoLearnStateless);
	let triggered = toggle.triggered.clone();
	let slot = app.expose_stateless(Some(button), "click", toggle).unwrap();

	let js = match renderer.trigger_stateless(&mut app, &slot).unwrap() {
		SlotOutcome::Learned(js) => js,
		other => panic!("Expected learning, got {:?}", other),
	};
	assert!(js.contains("e.style.display='none';"), "{}", js);
	assert!(app.tree.get::<Text>(text).unwrap().hidden);

	assert_eq!(renderer.trigger_stateless(&mut app, &slot).unwrap(), SlotOutcome::Cached(js));
	assert_eq!(triggered.get(), 1);
}

#[test]
fn failed_learning_stays_unlearned() {
	let (mut renderer, mut app, button, text) = rendered_app();
	app.tree.get_mut::<Text>(text).unwrap().fail = true;
	let slot = app.expose_stateless(Some(button), "click", ToggleHidden::new(text, SlotType::PreLearnStateless)).unwrap();

	assert!(renderer.learn(&mut app, &slot).is_err());
	assert_eq!(app.stateless_slots().state(&slot), Some(&LearnState::Unlearned));
	assert!(!renderer.is_pre_learning());
}

#[test]
fn removing_the_sender_invalidates_its_slots() {
	let (mut renderer, mut app, button, text) = rendered_app();
	let slot = app.expose_stateless(Some(button), "click", ToggleHidden::new(text, SlotType::PreLearnStateless)).unwrap();
	renderer.learn(&mut app, &slot).unwrap();

	app.remove_widget(button);
	assert_eq!(app.stateless_slots().state(&slot), Some(&LearnState::Unlearned));
}

#[test]
fn exposures_are_reference_counted() {
	let (_, mut app, button, text) = rendered_app();
	let first = app.expose_stateless(Some(button), "click", ToggleHidden::new(text, SlotType::PreLearnStateless)).unwrap();
	let second = app.expose_stateless(Some(button), "click", ToggleHidden::new(text, SlotType::PreLearnStateless)).unwrap();
	assert_eq!(first, second);
	assert_eq!(app.stateless_slots().references(&first), Some(2));

	app.unexpose_stateless(&first);
	app.unexpose_stateless(&first);
	assert_eq!(app.stateless_slots().references(&first), Some(0));
	// Kept until the next purge.
	assert!(app.stateless_slots().contains(&first));
}

#[test]
fn unreferenced_slots_are_purged() {
	let (_, _app, _, text) = rendered_app();
	let mut registry = SlotRegistry::new();
	let kept = SlotId::new("o1", "click");
	let dropped = SlotId::new("app", "keyPressed");
	assert!(registry.expose(kept.clone(), None, Box::new(ToggleHidden::new(text, SlotType::PreLearnStateless))));
	assert!(registry.expose(dropped.clone(), None, Box::new(ToggleHidden::new(text, SlotType::AutoLearnStateless))));
	assert_eq!(registry.unlearned(SlotType::PreLearnStateless), vec![kept.clone()]);

	registry.unexpose(&dropped);
	assert_eq!(registry.purge(), 1);
	assert!(registry.contains(&kept));
	assert!(!registry.contains(&dropped));
}
