use dom_session::{template::Template, TemplateError};

fn expand(source: &'static str, setup: impl FnOnce(&mut Template)) -> Result<String, TemplateError> {
	let mut template = Template::new(source);
	setup(&mut template);
	let mut out = String::new();
	template.stream(&mut out)?;
	Ok(out)
}

#[test]
fn variables_are_substituted() {
	let out = expand("Hello ${NAME}, ${NAME}!\n", |t| {
		t.set_var("NAME", "world");
	})
	.unwrap();
	assert_eq!(out, "Hello world, world!\n");
}

#[test]
fn conditions_select_lines() {
	let source = "a\n#if X\nb\n#else\nc\n#endif\n#if !X\nd\n#endif\ne";
	assert_eq!(expand(source, |t| { t.set_condition("X", true); }).unwrap(), "a\nb\ne");
	assert_eq!(expand(source, |t| { t.set_condition("X", false); }).unwrap(), "a\nc\nd\ne");
}

#[test]
fn conditions_nest() {
	let source = "#if A\n#if B\nab\n#endif\na\n#endif\n";
	let out = expand(source, |t| {
		t.set_condition("A", true).set_condition("B", false);
	})
	.unwrap();
	assert_eq!(out, "a\n");

	let out = expand(source, |t| {
		t.set_condition("A", false).set_condition("B", true);
	})
	.unwrap();
	assert_eq!(out, "");
}

#[test]
fn inactive_blocks_need_no_values() {
	let out = expand("#if X\n${MISSING}\n#endif\nok\n", |t| {
		t.set_condition("X", false);
	})
	.unwrap();
	assert_eq!(out, "ok\n");
}

#[test]
fn missing_values_are_errors() {
	assert_eq!(expand("${NAME}", |_| ()), Err(TemplateError::UnknownVariable("NAME".to_owned())));
	assert_eq!(expand("#if X\n#endif\n", |_| ()), Err(TemplateError::UnknownCondition("X".to_owned())));
}

#[test]
fn unbalanced_conditions_are_errors() {
	assert_eq!(
		expand("#if X\nopen\n", |t| {
			t.set_condition("X", true);
		}),
		Err(TemplateError::UnbalancedCondition { line: 3 })
	);
	assert_eq!(expand("a\n#endif\n", |_| ()), Err(TemplateError::UnbalancedCondition { line: 2 }));
}

#[test]
fn streaming_stops_at_marker() {
	let mut template = Template::new("<body>${HTML}</body>\n#if X\n${LATE}\n#endif\n");
	template.set_condition("X", true);

	let mut out = String::new();
	template.stream_until(&mut out, "HTML").unwrap();
	assert_eq!(out, "<body>");

	out.push_str("content");
	template.set_var("LATE", "late");
	template.stream(&mut out).unwrap();
	assert_eq!(out, "<body>content</body>\nlate\n");
}

#[test]
fn missing_marker_is_an_error() {
	let mut template = Template::new("no marker here");
	let mut out = String::new();
	assert_eq!(template.stream_until(&mut out, "HTML"), Err(TemplateError::MissingMarker("HTML".to_owned())));
}
