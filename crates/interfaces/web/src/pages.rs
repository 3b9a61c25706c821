//! Server-rendered HTML for the login, signup and chat pages.

use std::sync::LazyLock;

use minijinja::{Environment, context};

/// Template sources compiled into the binary.  Names end in `.html`, which
/// turns on HTML autoescaping for every interpolated value.
const TEMPLATES: &[(&str, &str)] = &[
    ("layout.html", include_str!("../templates/layout.html")),
    ("credentials.html", include_str!("../templates/credentials.html")),
    ("login.html", include_str!("../templates/login.html")),
    ("signup.html", include_str!("../templates/signup.html")),
    ("chat.html", include_str!("../templates/chat.html")),
];

static PAGES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_loader(|name| {
        Ok(TEMPLATES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, source)| source.to_string()))
    });
    env
});

pub fn login_page(notice: Option<&str>) -> Result<String, minijinja::Error> {
    PAGES
        .get_template("login.html")?
        .render(context! { title => "Mindful · Log in", notice })
}

pub fn signup_page(notice: Option<&str>) -> Result<String, minijinja::Error> {
    PAGES
        .get_template("signup.html")?
        .render(context! { title => "Mindful · Sign up", notice })
}

pub fn chat_page(username: &str) -> Result<String, minijinja::Error> {
    PAGES
        .get_template("chat.html")?
        .render(context! { title => "Mindful", username })
}
