//! HTML page rendering.

use minijinja::{context, Environment};

const INDEX_TEMPLATE: &str = include_str!("../templates/index.html");

/// Compiled templates plus the values every page shares.
#[derive(Debug)]
pub struct Pages {
    env: Environment<'static>,
    title: String,
}

impl Pages {
    pub fn new(title: &str) -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("index.html", INDEX_TEMPLATE)?;
        Ok(Self { env, title: title.to_owned() })
    }

    /// The submission form, optionally with an error or success banner.
    pub fn index(&self, error: Option<&str>, success: Option<&str>) -> Result<String, minijinja::Error> {
        self.env.get_template("index.html")?.render(context! {
            title => self.title,
            error => error,
            success => success,
        })
    }
}
