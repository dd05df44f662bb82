// #[gdclass_impl] macro: generates virtual overrides, signals, notification
// and display hooks for an impl block on a #[gdclass] struct.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::{
    FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, Meta, ReturnType, Signature, Token, Type,
    Visibility, parse2,
};

const MARKERS: [&str; 4] = ["gdvirtual", "signal", "notification", "display"];

// ---------------------------------------------------------------------------
// Parsed items
// ---------------------------------------------------------------------------

struct VirtualInfo {
    method_ident: Ident,
    engine_name: String,
    param_types: Vec<Type>,
}

struct SignalInfo {
    vis: Visibility,
    method_ident: Ident,
    params: Vec<(Ident, Type)>,
}

// ---------------------------------------------------------------------------
// Main expansion
// ---------------------------------------------------------------------------

pub fn expand_gdclass_impl(_attr: TokenStream, item: TokenStream) -> syn::Result<TokenStream> {
    let input: ItemImpl = parse2(item)?;
    let self_ty = input.self_ty.clone();
    if input.trait_.is_some() {
        return Err(syn::Error::new_spanned(
            &input,
            "#[gdclass_impl] goes on an inherent impl block, not a trait impl",
        ));
    }

    let mut virtuals: Vec<VirtualInfo> = Vec::new();
    let mut signals: Vec<SignalInfo> = Vec::new();
    let mut notification: Option<Ident> = None;
    let mut display: Option<Ident> = None;
    let mut clean_impl = input.clone();
    clean_impl.items.clear();

    for item in input.items {
        match item {
            ImplItem::Fn(mut method) => {
                if has_marker(&method.attrs, "signal") {
                    return Err(syn::Error::new_spanned(
                        &method.sig,
                        "a #[signal] is a declaration without a body: `fn ticked(&self, count: i64);`",
                    ));
                }
                if let Some(attr) = method.attrs.iter().find(|a| a.path().is_ident("gdvirtual")) {
                    virtuals.push(parse_virtual(&method, attr)?);
                }
                if has_marker(&method.attrs, "notification") {
                    require_receiver(&method.sig)?;
                    notification = Some(method.sig.ident.clone());
                }
                if has_marker(&method.attrs, "display") {
                    require_receiver(&method.sig)?;
                    display = Some(method.sig.ident.clone());
                }
                method
                    .attrs
                    .retain(|a| !MARKERS.iter().any(|name| a.path().is_ident(name)));
                clean_impl.items.push(ImplItem::Fn(method));
            }
            // `fn name(&self, ..);` inside an impl is not valid Rust on its
            // own, so syn hands it over verbatim.
            ImplItem::Verbatim(tokens) => match parse2::<SignalDecl>(tokens.clone()) {
                Ok(decl) if has_marker(&decl.attrs, "signal") => {
                    let info = parse_signal(&decl.sig, decl.vis.clone())?;
                    clean_impl.items.push(ImplItem::Fn(emitter(&info, &decl.attrs)?));
                    signals.push(info);
                }
                _ => clean_impl.items.push(ImplItem::Verbatim(tokens)),
            },
            other => clean_impl.items.push(other),
        }
    }

    // --- Builder statements ---
    let mut register_stmts: Vec<TokenStream> = Vec::new();

    for v in &virtuals {
        let method_ident = &v.method_ident;
        let engine_name = &v.engine_name;
        let arg_idents: Vec<Ident> = (0..v.param_types.len())
            .map(|i| format_ident!("__a{}", i))
            .collect();
        let tys = &v.param_types;
        register_stmts.push(quote! {
            builder.virtual_method(
                #engine_name,
                |this: &mut #self_ty, (#(#arg_idents,)*): (#(#tys,)*)| this.#method_ident(#(#arg_idents),*),
            );
        });
    }

    for s in &signals {
        let name = s.method_ident.to_string();
        let profile: Vec<TokenStream> = s
            .params
            .iter()
            .map(|(ident, ty)| {
                let arg_name = ident.to_string();
                quote! { (#arg_name, <#ty as ::gdbind::runtime::VariantKind>::VARIANT_TYPE) }
            })
            .collect();
        register_stmts.push(quote! {
            builder.signal(#name, &[#(#profile),*]);
        });
    }

    if let Some(ident) = &notification {
        register_stmts.push(quote! {
            builder.on_notification(|this: &mut #self_ty, what: i32| this.#ident(what));
        });
    }

    if let Some(ident) = &display {
        register_stmts.push(quote! {
            builder.to_display(|this: &#self_ty| -> ::std::string::String { this.#ident() });
        });
    }

    if register_stmts.is_empty() {
        return Ok(quote! { #clean_impl });
    }

    Ok(quote! {
        #clean_impl

        ::gdbind::__inventory::submit! {
            ::gdbind::runtime::ClassImplRegistration {
                class: <#self_ty as ::gdbind::runtime::EngineClass>::CLASS_NAME,
                register: {
                    fn __gdbind_register_impl(descriptor: &mut ::gdbind::runtime::ClassDescriptor) {
                        let mut builder = ::gdbind::runtime::ClassBuilder::<#self_ty>::new(descriptor);
                        #(#register_stmts)*
                    }
                    __gdbind_register_impl
                },
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn has_marker(attrs: &[syn::Attribute], name: &str) -> bool {
    attrs.iter().any(|a| a.path().is_ident(name))
}

fn require_receiver(sig: &Signature) -> syn::Result<()> {
    match sig.inputs.first() {
        Some(FnArg::Receiver(_)) => Ok(()),
        _ => Err(syn::Error::new_spanned(
            sig,
            "engine callbacks need a `&self` or `&mut self` receiver",
        )),
    }
}

/// Typed parameters after the receiver, as simple identifiers.
fn typed_params(sig: &Signature) -> syn::Result<Vec<(Ident, Type)>> {
    let mut params = Vec::new();
    for arg in sig.inputs.iter().skip(1) {
        let FnArg::Typed(pat_type) = arg else {
            continue;
        };
        let syn::Pat::Ident(pi) = &*pat_type.pat else {
            return Err(syn::Error::new_spanned(
                &pat_type.pat,
                "parameters must be simple identifiers",
            ));
        };
        params.push((pi.ident.clone(), (*pat_type.ty).clone()));
    }
    Ok(params)
}

/// `#[gdvirtual]` or `#[gdvirtual(name = "_ready")]`. Without a name the
/// method name is the engine virtual's name.
fn parse_virtual(method: &ImplItemFn, attr: &syn::Attribute) -> syn::Result<VirtualInfo> {
    require_receiver(&method.sig)?;
    let mut engine_name = method.sig.ident.to_string();
    if !matches!(attr.meta, Meta::Path(_)) {
        let nested = attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
        for meta in &nested {
            match meta {
                Meta::NameValue(nv) if nv.path.is_ident("name") => match &nv.value {
                    syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(s), ..
                    }) => engine_name = s.value(),
                    other => {
                        return Err(syn::Error::new_spanned(other, "name must be a string literal"));
                    }
                },
                other => return Err(syn::Error::new_spanned(other, "unknown #[gdvirtual] option")),
            }
        }
    }
    if let ReturnType::Type(_, ty) = &method.sig.output {
        if let Type::Reference(_) = &**ty {
            return Err(syn::Error::new_spanned(ty, "virtual overrides return values, not references"));
        }
    }
    Ok(VirtualInfo {
        method_ident: method.sig.ident.clone(),
        engine_name,
        param_types: typed_params(&method.sig)?.into_iter().map(|(_, ty)| ty).collect(),
    })
}

fn parse_signal(sig: &Signature, vis: Visibility) -> syn::Result<SignalInfo> {
    match sig.inputs.first() {
        Some(FnArg::Receiver(r)) if r.reference.is_some() && r.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new_spanned(
                sig,
                "a #[signal] declaration takes `&self`: `fn ticked(&self, count: i64);`",
            ));
        }
    }
    if !matches!(sig.output, ReturnType::Default) {
        return Err(syn::Error::new_spanned(
            &sig.output,
            "a #[signal] declaration has no return type; the emitter returns BindResult<()>",
        ));
    }
    Ok(SignalInfo {
        vis,
        method_ident: sig.ident.clone(),
        params: typed_params(sig)?,
    })
}

/// A bodiless method declaration: attributes, visibility, signature, `;`.
struct SignalDecl {
    attrs: Vec<syn::Attribute>,
    vis: Visibility,
    sig: Signature,
}

impl syn::parse::Parse for SignalDecl {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let attrs = input.call(syn::Attribute::parse_outer)?;
        let vis = input.parse()?;
        let sig = input.parse()?;
        input.parse::<Token![;]>()?;
        Ok(SignalDecl { attrs, vis, sig })
    }
}

/// The emitter that replaces a signal declaration.
fn emitter(info: &SignalInfo, attrs: &[syn::Attribute]) -> syn::Result<ImplItemFn> {
    let vis = &info.vis;
    let ident = &info.method_ident;
    let name = ident.to_string();
    let docs: Vec<&syn::Attribute> = attrs
        .iter()
        .filter(|a| a.path().is_ident("doc"))
        .collect();
    let params: Vec<TokenStream> = info
        .params
        .iter()
        .map(|(ident, ty)| quote! { #ident: #ty })
        .collect();
    let values: Vec<TokenStream> = info
        .params
        .iter()
        .map(|(ident, _)| quote! { ::gdbind::runtime::ToVariant::to_variant(&#ident) })
        .collect();
    parse2(quote! {
        #(#docs)*
        #vis fn #ident(&self, #(#params),*) -> ::gdbind::runtime::BindResult<()> {
            let object = ::gdbind::runtime::Gd::upcast_object(
                ::gdbind::runtime::Base::to_gd(self.__gdbind_base()),
            );
            object.emit_signal(#name, &[#(#values),*])
        }
    })
}
