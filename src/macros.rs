/// Lazily compiled static regex. Only for literal patterns known to be valid.
#[macro_export]
macro_rules! regex {
    ($pat:literal) => {{
        static RE: once_cell::sync::Lazy<regex::Regex> =
            once_cell::sync::Lazy::new(|| regex::Regex::new($pat).unwrap());
        &*RE
    }};
}

/// Build a [`Bindings`](crate::Bindings) map from `key => value` pairs.
///
/// ```
/// let vars = parlance::bindings! { "name" => "sam", "mood" => "good" };
/// assert_eq!(vars.get("name").map(String::as_str), Some("sam"));
/// ```
#[macro_export]
macro_rules! bindings {
    () => {
        $crate::Bindings::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut vars = $crate::Bindings::new();
        $(
            vars.insert(::std::string::String::from($key), ::std::string::String::from($value));
        )+
        vars
    }};
}
