// gdbind-macros: proc macros for #[gdclass] and #[gdclass_impl].

mod gdclass;
mod gdclass_impl;

/// Attribute macro that turns a struct into an engine extension class.
///
/// # Example
/// ```ignore
/// #[gdclass(parent = Node3D)]
/// pub struct MyNode {
///     #[base]
///     base: Base<MyNode>,
///
///     #[export]
///     speed: f64,
///
///     #[export(read_only)]
///     #[init(default = 0)]
///     ticks: i64,
///
///     // host-only state, starts at Default::default()
///     history: Vec<f64>,
/// }
/// ```
///
/// Arguments: `parent = Type` (required), `level = Core | Servers | Scene |
/// Editor` (default `Scene`), `is_abstract`.
#[proc_macro_attribute]
pub fn gdclass(
    attr: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    match gdclass::expand_gdclass(attr.into(), item.into()) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Attribute macro for an impl block on a `#[gdclass]` struct.
///
/// - `#[gdvirtual]` methods override the engine virtual of the same name.
/// - `#[signal]` declarations (no body) register a signal and become an
///   emitter method returning `BindResult<()>`.
/// - `#[notification]` receives every notification (`fn(&mut self, i32)`).
/// - `#[display]` supplies the text the engine shows for an instance.
///
/// # Example
/// ```ignore
/// #[gdclass_impl]
/// impl MyNode {
///     #[gdvirtual]
///     fn _physics_process(&mut self, delta: f64) {
///         self.ticks += 1;
///     }
///
///     #[signal]
///     fn ticked(&self, count: i64);
///
///     fn helper(&self) -> f64 { self.speed * 2.0 }  // plain Rust method
/// }
/// ```
#[proc_macro_attribute]
pub fn gdclass_impl(
    attr: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    match gdclass_impl::expand_gdclass_impl(attr.into(), item.into()) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
