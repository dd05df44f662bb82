// Core gdclass macro expansion: parses #[gdclass(parent = Type)] on a struct
// with #[base], #[export(...)] and #[init(...)] fields and generates the
// EngineClass/ExtensionClass impls plus the inventory registration.

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Expr, Fields, Ident, ItemStruct, Lit, Meta, Token, parse2};

// ---------------------------------------------------------------------------
// Attribute parsing
// ---------------------------------------------------------------------------

const LEVELS: [&str; 4] = ["Core", "Servers", "Scene", "Editor"];

/// Parsed #[gdclass(...)] attributes.
struct GdClassArgs {
    parent_path: syn::Path,
    level: Ident,
    is_abstract: bool,
}

fn parse_gdclass_args(attr: TokenStream) -> syn::Result<GdClassArgs> {
    let metas: Punctuated<Meta, Token![,]> =
        syn::parse::Parser::parse2(Punctuated::<Meta, Token![,]>::parse_terminated, attr)?;

    let mut parent_path: Option<syn::Path> = None;
    let mut level = Ident::new("Scene", Span::call_site());
    let mut is_abstract = false;
    for meta in &metas {
        match meta {
            Meta::NameValue(nv) if nv.path.is_ident("parent") => {
                let Expr::Path(expr_path) = &nv.value else {
                    return Err(syn::Error::new_spanned(
                        &nv.value,
                        "`parent` must be a type path, not a string literal.\n\n\
                         Example: #[gdclass(parent = Node3D)]",
                    ));
                };
                parent_path = Some(expr_path.path.clone());
            }
            Meta::NameValue(nv) if nv.path.is_ident("level") => {
                let ident = match &nv.value {
                    Expr::Path(p) => p.path.get_ident().cloned(),
                    _ => None,
                };
                match ident {
                    Some(ident) if LEVELS.contains(&ident.to_string().as_str()) => level = ident,
                    _ => {
                        return Err(syn::Error::new_spanned(
                            &nv.value,
                            "`level` must be one of Core, Servers, Scene, Editor",
                        ));
                    }
                }
            }
            Meta::Path(p) if p.is_ident("is_abstract") => is_abstract = true,
            other => {
                return Err(syn::Error::new_spanned(other, "unknown #[gdclass] argument"));
            }
        }
    }

    let parent_path = parent_path.ok_or_else(|| {
        syn::Error::new(
            Span::call_site(),
            "#[gdclass] requires a `parent` attribute naming the engine parent class.\n\n\
             Example:\n\
             \x20   #[gdclass(parent = Node3D)]\n\
             \x20   pub struct MyNode { ... }",
        )
    })?;
    Ok(GdClassArgs {
        parent_path,
        level,
        is_abstract,
    })
}

/// Options parsed from #[export(...)].
#[derive(Default)]
struct ExportArgs {
    read_only: bool,
    hint: Option<Expr>,
    hint_string: Option<String>,
}

fn parse_export_args(attr: &syn::Attribute) -> syn::Result<ExportArgs> {
    let mut args = ExportArgs::default();
    // #[export] with no parens
    if matches!(attr.meta, Meta::Path(_)) {
        return Ok(args);
    }
    let nested = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
    for meta in &nested {
        match meta {
            Meta::Path(p) if p.is_ident("read_only") => args.read_only = true,
            Meta::NameValue(nv) if nv.path.is_ident("hint") => args.hint = Some(nv.value.clone()),
            Meta::NameValue(nv) if nv.path.is_ident("hint_string") => match &nv.value {
                Expr::Lit(syn::ExprLit {
                    lit: Lit::Str(s), ..
                }) => args.hint_string = Some(s.value()),
                _ => {
                    return Err(syn::Error::new_spanned(
                        &nv.value,
                        "hint_string must be a string literal, e.g. hint_string = \"0,10\"",
                    ));
                }
            },
            other => return Err(syn::Error::new_spanned(other, "unknown #[export] option")),
        }
    }
    Ok(args)
}

fn parse_init_default(attr: &syn::Attribute) -> syn::Result<Expr> {
    let nested = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
    for meta in &nested {
        if let Meta::NameValue(nv) = meta {
            if nv.path.is_ident("default") {
                return Ok(nv.value.clone());
            }
        }
    }
    Err(syn::Error::new_spanned(
        attr,
        "#[init] expects `default = <expr>`, e.g. #[init(default = 0.5)]",
    ))
}

// ---------------------------------------------------------------------------
// Field classification
// ---------------------------------------------------------------------------

struct ClassField {
    ident: Ident,
    ty: syn::Type,
    is_base: bool,
    export: Option<ExportArgs>,
    default_expr: Option<Expr>,
}

const HELPER_ATTRS: [&str; 3] = ["base", "export", "init"];

// ---------------------------------------------------------------------------
// Code generation
// ---------------------------------------------------------------------------

pub fn expand_gdclass(attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let args = parse_gdclass_args(attr)?;
    let mut input: ItemStruct = parse2(item)?;

    let struct_name = input.ident.clone();
    let struct_name_str = struct_name.to_string();

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "#[gdclass] structs cannot be generic: the engine sees one class per struct",
        ));
    }

    let mut fields: Vec<ClassField> = Vec::new();
    match &mut input.fields {
        Fields::Named(named) => {
            for field in named.named.iter_mut() {
                let Some(ident) = field.ident.clone() else {
                    continue;
                };
                let mut class_field = ClassField {
                    ident,
                    ty: field.ty.clone(),
                    is_base: false,
                    export: None,
                    default_expr: None,
                };
                for attr in &field.attrs {
                    if attr.path().is_ident("base") {
                        class_field.is_base = true;
                    } else if attr.path().is_ident("export") {
                        class_field.export = Some(parse_export_args(attr)?);
                    } else if attr.path().is_ident("init") {
                        class_field.default_expr = Some(parse_init_default(attr)?);
                    }
                }
                if class_field.is_base && (class_field.export.is_some() || class_field.default_expr.is_some()) {
                    return Err(syn::Error::new_spanned(
                        &field.ty,
                        "the #[base] field cannot also be #[export] or #[init]",
                    ));
                }
                field
                    .attrs
                    .retain(|a| !HELPER_ATTRS.iter().any(|name| a.path().is_ident(name)));
                fields.push(class_field);
            }
        }
        Fields::Unit => {}
        Fields::Unnamed(_) => {
            return Err(syn::Error::new_spanned(
                &input,
                "#[gdclass] requires a struct with named fields.\n\n\
                 Example:\n\
                 \x20   #[gdclass(parent = Node)]\n\
                 \x20   pub struct MyNode {\n\
                 \x20       #[base]\n\
                 \x20       base: Base<MyNode>,\n\
                 \x20   }",
            ));
        }
    }

    let bases: Vec<&ClassField> = fields.iter().filter(|f| f.is_base).collect();
    if bases.len() > 1 {
        return Err(syn::Error::new_spanned(&bases[1].ident, "only one field can be #[base]"));
    }
    let base_field = bases.first().map(|f| &f.ident);

    let parent_path = &args.parent_path;
    let level = &args.level;

    // --- 1. EngineClass / HasParent ---
    let engine_class_impl = quote! {
        impl ::gdbind::runtime::EngineClass for #struct_name {
            const CLASS_NAME: &'static str = #struct_name_str;

            fn class_record() -> &'static ::gdbind::runtime::ClassRecord {
                static RECORD: ::gdbind::runtime::ClassRecord = ::gdbind::runtime::ClassRecord::new(
                    #struct_name_str,
                    Some(<#parent_path as ::gdbind::runtime::EngineClass>::class_record
                        as fn() -> &'static ::gdbind::runtime::ClassRecord),
                    ::gdbind::runtime::Refcount::Inherited,
                );
                &RECORD
            }
        }

        impl ::gdbind::runtime::HasParent for #struct_name {
            type Parent = #parent_path;
        }
    };

    // --- 2. init: base, #[init] defaults, Default::default() for the rest ---
    let init_body = if matches!(input.fields, Fields::Unit) {
        quote! {
            let _ = __base;
            Self
        }
    } else {
        let inits: Vec<TokenStream> = fields
            .iter()
            .map(|f| {
                let ident = &f.ident;
                if f.is_base {
                    quote! { #ident: __base, }
                } else if let Some(expr) = &f.default_expr {
                    quote! { #ident: #expr, }
                } else {
                    quote! { #ident: ::core::default::Default::default(), }
                }
            })
            .collect();
        let discard = if base_field.is_none() {
            quote! { let _ = __base; }
        } else {
            quote! {}
        };
        quote! {
            #discard
            Self { #(#inits)* }
        }
    };

    // --- 3. register: exported properties ---
    let mut register_stmts: Vec<TokenStream> = Vec::new();
    for f in &fields {
        let Some(export) = &f.export else {
            continue;
        };
        let ident = &f.ident;
        let ty = &f.ty;
        let name = ident.to_string();
        let getter = quote! {
            |this: &#struct_name| -> #ty { ::core::clone::Clone::clone(&this.#ident) }
        };
        let setter = quote! {
            |this: &mut #struct_name, value: #ty| this.#ident = value
        };
        register_stmts.push(if export.read_only {
            quote! { builder.read_only_property(#name, #getter); }
        } else if export.hint.is_some() || export.hint_string.is_some() {
            let hint = export
                .hint
                .as_ref()
                .map_or_else(|| quote! { ::gdbind::ffi::PROPERTY_HINT_NONE }, |h| quote! { #h });
            let hint_string = export.hint_string.clone().unwrap_or_default();
            quote! { builder.hinted_property(#name, #hint, #hint_string, #getter, #setter); }
        } else {
            quote! { builder.property(#name, #getter, #setter); }
        });
    }
    if args.is_abstract {
        register_stmts.push(quote! { builder.abstract_class(); });
    }

    let extension_impl = quote! {
        impl ::gdbind::runtime::ExtensionClass for #struct_name {
            const INIT_LEVEL: ::gdbind::runtime::InitializationLevel =
                ::gdbind::runtime::InitializationLevel::#level;

            fn init(__base: ::gdbind::runtime::Base<Self>) -> Self {
                #init_body
            }

            #[allow(unused_variables)]
            fn register(builder: &mut ::gdbind::runtime::ClassBuilder<'_, Self>) {
                #(#register_stmts)*
            }
        }
    };

    // --- 4. Base accessor for #[signal] emitters ---
    let base_accessor = base_field.map(|ident| {
        quote! {
            impl #struct_name {
                #[doc(hidden)]
                pub fn __gdbind_base(&self) -> &::gdbind::runtime::Base<Self> {
                    &self.#ident
                }
            }
        }
    });

    Ok(quote! {
        #input
        #engine_class_impl
        #extension_impl
        #base_accessor

        ::gdbind::__inventory::submit! {
            ::gdbind::runtime::ClassRegistration {
                class: #struct_name_str,
                level: ::gdbind::runtime::InitializationLevel::#level,
                register: ::gdbind::runtime::extension::register::<#struct_name>,
                unregister: ::gdbind::runtime::extension::unregister::<#struct_name>,
            }
        }
    })
}
