use dom_session::{
	collect::{ChangeCollector, CollectMode, DirtySet},
	dom::{ChangeKind, DomChange, Property},
	widget::RenderFlags,
	Application, WidgetId,
};

mod widgets_;
use widgets_::{app_with_texts, enable_logger, Container, Text};

const VISIBLE: CollectMode = CollectMode::Full { visible_only: true };

/// Renders the whole tree, as the first page would, and returns the (clean) dirty set.
fn render(app: &mut Application) -> DirtySet {
	let root = app.root();
	app.tree.create_element(root, &mut RenderFlags::default()).unwrap();
	let mut dirty = DirtySet::new();
	dirty.absorb(&mut app.tree);
	dirty.clear();
	dirty
}

fn collect(app: &mut Application, dirty: &mut DirtySet, mode: CollectMode) -> Vec<DomChange> {
	let root = app.root();
	ChangeCollector::new()
		.collect(dirty, &mut app.tree, &[root], mode, &mut RenderFlags::default())
		.unwrap()
}

fn dom_id(app: &Application, id: WidgetId) -> String {
	app.tree.dom_id(id).unwrap().to_owned()
}

#[test]
fn only_the_changed_child_is_updated() {
	enable_logger();
	let (mut app, ids) = app_with_texts(&["one", "two"]);
	let mut dirty = render(&mut app);
	let root = app.root();
	let root_diffs = app.tree.get::<Container>(root).unwrap().diffs.clone();
	let other_diffs = app.tree.get::<Text>(ids[1]).unwrap().diffs.clone();

	app.tree.update::<Text, _>(ids[0], |text| text.text = "changed".to_owned());
	let changes = collect(&mut app, &mut dirty, VISIBLE);

	assert_eq!(changes, vec![DomChange::update(dom_id(&app, ids[0])).set_property(Property::InnerHtml, "changed")]);
	assert_eq!(root_diffs.get(), 0);
	assert_eq!(other_diffs.get(), 0);
	assert!(dirty.is_empty());
}

#[test]
fn collecting_again_yields_nothing() {
	let (mut app, ids) = app_with_texts(&["one"]);
	let mut dirty = render(&mut app);

	app.tree.update::<Text, _>(ids[0], |text| text.text = "changed".to_owned());
	assert_eq!(collect(&mut app, &mut dirty, VISIBLE).len(), 1);
	assert_eq!(collect(&mut app, &mut dirty, VISIBLE), vec![]);
}

#[test]
fn unchanged_dirty_widget_emits_nothing() {
	let (mut app, ids) = app_with_texts(&["one"]);
	let mut dirty = render(&mut app);

	app.tree.mark_dirty(ids[0], false);
	assert_eq!(collect(&mut app, &mut dirty, VISIBLE), vec![]);
	assert!(dirty.is_empty());
}

#[test]
fn descendants_dirtied_during_collection_are_collected_in_the_same_call() {
	let mut app = Application::new(Container::new());
	let root = app.root();
	let child = app.tree.insert(Some(root), Container::cascading());
	let grandchild = app.tree.insert(Some(child), Text::new("before"));
	let mut dirty = render(&mut app);
	let grandchild_diffs = app.tree.get::<Text>(grandchild).unwrap().diffs.clone();

	// Not marked dirty: the child's update does that.
	app.tree.get_mut::<Text>(grandchild).unwrap().text = "after".to_owned();
	app.tree.mark_dirty(root, false);
	app.tree.mark_dirty(child, false);

	let changes = collect(&mut app, &mut dirty, VISIBLE);
	assert_eq!(changes, vec![DomChange::update(dom_id(&app, grandchild)).set_property(Property::InnerHtml, "after")]);
	assert_eq!(grandchild_diffs.get(), 1);
	assert!(dirty.is_empty());
}

#[test]
fn all_dirty_chain_is_collected_root_first() {
	let mut app = Application::new(Container::new());
	let root = app.root();
	let child = app.tree.insert(Some(root), Container::cascading());
	let grandchild = app.tree.insert(Some(child), Text::new("before"));
	let mut dirty = render(&mut app);
	let grandchild_diffs = app.tree.get::<Text>(grandchild).unwrap().diffs.clone();

	app.tree.update::<Container, _>(child, |child| child.hidden = true);
	app.tree.update::<Text, _>(grandchild, |text| text.text = "after".to_owned());
	app.tree.mark_dirty(root, false);

	let changes = collect(&mut app, &mut dirty, CollectMode::Full { visible_only: false });
	assert_eq!(
		changes,
		vec![
			DomChange::update(dom_id(&app, child)).set_property(Property::StyleDisplay, "none"),
			DomChange::update(dom_id(&app, grandchild)).set_property(Property::InnerHtml, "after"),
		]
	);
	assert_eq!(grandchild_diffs.get(), 1);
}

#[test]
fn new_child_is_created_at_its_position() {
	let (mut app, _) = app_with_texts(&["one"]);
	let mut dirty = render(&mut app);
	let root = app.root();

	let added = app.tree.insert(Some(root), Text::new("two"));
	let changes = collect(&mut app, &mut dirty, VISIBLE);

	assert_eq!(changes.len(), 1);
	assert_eq!(changes[0].target, dom_id(&app, added));
	match &changes[0].kind {
		ChangeKind::Create { parent, position, element } => {
			assert_eq!(parent, &dom_id(&app, root));
			assert_eq!(*position, Some(1));
			assert_eq!(element.tag, "span");
		}
		other => panic!("Expected a creation, got {:?}", other),
	}
	assert!(app.tree.is_rendered(added));
}

#[test]
fn removed_widget_is_deleted_by_its_parent() {
	let (mut app, ids) = app_with_texts(&["one", "two"]);
	let mut dirty = render(&mut app);
	let removed_dom_id = dom_id(&app, ids[0]);

	app.tree.update::<Text, _>(ids[0], |text| text.text = "gone anyway".to_owned());
	app.remove_widget(ids[0]);

	assert_eq!(collect(&mut app, &mut dirty, VISIBLE), vec![DomChange::delete(removed_dom_id)]);
	assert!(dirty.is_empty());
}

#[test]
fn detached_widgets_are_cleaned_silently() {
	let (mut app, _) = app_with_texts(&["one"]);
	let mut dirty = render(&mut app);

	let loose = app.tree.insert(None, Text::new("loose"));
	assert_eq!(collect(&mut app, &mut dirty, VISIBLE), vec![]);
	assert!(!dirty.contains(loose));
}

#[test]
fn invisible_widgets_wait_for_a_full_collection() {
	let mut app = Application::new(Container::new());
	let root = app.root();
	let panel = app.tree.insert(Some(root), Container::hidden());
	let text = app.tree.insert(Some(panel), Text::new("before"));
	let mut dirty = render(&mut app);

	app.tree.update::<Text, _>(text, |text| text.text = "after".to_owned());
	assert_eq!(collect(&mut app, &mut dirty, VISIBLE), vec![]);
	assert!(dirty.contains(text));

	let changes = collect(&mut app, &mut dirty, CollectMode::Full { visible_only: false });
	assert_eq!(changes, vec![DomChange::update(dom_id(&app, text)).set_property(Property::InnerHtml, "after")]);
	assert!(dirty.is_empty());
}

#[test]
fn failing_widget_stops_the_collection() {
	let (mut app, ids) = app_with_texts(&["one", "two"]);
	let mut dirty = render(&mut app);
	let root = app.root();

	app.tree.update::<Text, _>(ids[0], |text| text.fail = true);
	app.tree.update::<Text, _>(ids[1], |text| text.text = "changed".to_owned());

	let error = ChangeCollector::new()
		.collect(&mut dirty, &mut app.tree, &[root], VISIBLE, &mut RenderFlags::default())
		.unwrap_err();
	assert_eq!(error.widget, dom_id(&app, ids[0]));
	assert!(dirty.contains(ids[0]));
	assert!(dirty.contains(ids[1]));
}

#[test]
fn later_only_updates_do_not_force_another_pass() {
	let (mut app, ids) = app_with_texts(&["one"]);
	let mut dirty = render(&mut app);

	dirty.need_update(ids[0], true);
	assert!(dirty.contains(ids[0]));
	assert!(!dirty.more_updates());
	dirty.need_update(ids[0], false);
	assert_eq!(dirty.len(), 1);
	assert!(dirty.more_updates());
}
