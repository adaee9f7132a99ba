use dom_session::{widget::RenderFlags, Application, Configuration, Environment, Renderer, Request, Response, ResponseType, WidgetId};
use std::sync::Arc;

mod widgets_;
use widgets_::{enable_logger, Container, Text};

const FETCH_INVISIBLE: &str = "Wt._p_.update(null, 'none', null, false);";

/// A rendered application with a text inside a hidden panel.
fn hidden_text_app() -> (Renderer, Application, WidgetId) {
	enable_logger();
	let mut app = Application::new(Container::new());
	let root = app.root();
	app.tree.insert(Some(root), Text::new("visible"));
	let panel = app.tree.insert(Some(root), Container::hidden());
	let text = app.tree.insert(Some(panel), Text::new("before"));
	app.tree.create_element(root, &mut RenderFlags::default()).unwrap();

	let mut renderer = Renderer::new(Arc::new(Configuration::default()), Environment::default(), "two-phase");
	renderer.collect_changes(&mut app).unwrap();
	renderer.set_rendered(true);
	(renderer, app, text)
}

fn serve_update(renderer: &mut Renderer, app: &mut Application) -> String {
	let mut response = Response::new(ResponseType::Update);
	renderer
		.serve_response(&Request::new(ResponseType::Update), &mut response, Some(app))
		.unwrap();
	assert_eq!(response.status(), 200);
	assert_eq!(response.content_type(), "text/javascript; charset=UTF-8");
	response.body().to_owned()
}

fn acknowledge(renderer: &mut Renderer) {
	let expected = renderer.expected_ack_id();
	assert!(renderer.ack_update(expected));
}

#[test]
fn small_invisible_changes_are_inlined() {
	let (mut renderer, mut app, text) = hidden_text_app();
	assert_eq!(renderer.two_phase_threshold(), 5000);

	app.tree.update::<Text, _>(text, |text| text.text = "small".to_owned());
	let js = serve_update(&mut renderer, &mut app);

	assert!(js.contains("e.innerHTML='small';"), "{}", js);
	assert!(!js.contains(FETCH_INVISIBLE), "{}", js);
	assert!(renderer.dirty().is_empty());
}

#[test]
fn large_invisible_changes_are_fetched_later() {
	let (mut renderer, mut app, text) = hidden_text_app();
	renderer.set_two_phase_threshold(10);

	app.tree.update::<Text, _>(text, |text| text.text = "large enough".to_owned());
	let js = serve_update(&mut renderer, &mut app);
	assert!(js.contains(FETCH_INVISIBLE), "{}", js);
	assert!(!js.contains("large enough"), "{}", js);

	acknowledge(&mut renderer);
	let js = serve_update(&mut renderer, &mut app);
	assert!(js.contains("e.innerHTML='large enough';"), "{}", js);
	assert!(!js.contains(FETCH_INVISIBLE), "{}", js);
}

#[test]
fn visible_changes_are_never_withheld() {
	let (mut renderer, mut app, text) = hidden_text_app();
	renderer.set_two_phase_threshold(10);
	let root = app.root();
	let visible = app.tree.children(root)[0];

	app.tree.update::<Text, _>(visible, |text| text.text = "now".to_owned());
	app.tree.update::<Text, _>(text, |text| text.text = "later".to_owned());
	let js = serve_update(&mut renderer, &mut app);
	assert!(js.contains("e.innerHTML='now';"), "{}", js);
	assert!(!js.contains("later"), "{}", js);
}

#[test]
fn zero_threshold_always_defers() {
	let (mut renderer, mut app, text) = hidden_text_app();
	renderer.set_two_phase_threshold(0);

	app.tree.update::<Text, _>(text, |text| text.text = "x".to_owned());
	let js = serve_update(&mut renderer, &mut app);
	assert!(js.contains(FETCH_INVISIBLE), "{}", js);
	assert!(renderer.dirty().contains(text));

	acknowledge(&mut renderer);
	renderer.set_visible_only(false);
	let js = serve_update(&mut renderer, &mut app);
	assert!(js.contains("e.innerHTML='x';"), "{}", js);
	assert!(renderer.dirty().is_empty());
	assert!(renderer.is_visible_only());
}

#[test]
fn unacknowledged_updates_are_resent() {
	let (mut renderer, mut app, text) = hidden_text_app();
	let root = app.root();
	let visible = app.tree.children(root)[0];

	app.tree.update::<Text, _>(visible, |text| text.text = "first".to_owned());
	let first = serve_update(&mut renderer, &mut app);
	app.tree.update::<Text, _>(text, |text| text.text = "second".to_owned());
	let retried = serve_update(&mut renderer, &mut app);
	assert!(first.contains("'first'"));
	assert!(retried.contains("'first'") && retried.contains("'second'"), "{}", retried);

	acknowledge(&mut renderer);
	let js = serve_update(&mut renderer, &mut app);
	assert!(!js.contains("'first'") && !js.contains("'second'"), "{}", js);
}
