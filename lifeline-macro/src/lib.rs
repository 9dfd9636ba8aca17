use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Expr, ExprLit, FnArg, ImplItem, ImplItemFn, ItemImpl, Lit, Meta, MetaNameValue, Type};

/// Generate a by-name method table for an owner type
///
/// Apply to an inherent `impl` block. Every method marked `#[task]` becomes
/// addressable by name from `run_task`, `schedule_task`, `throttle_task`,
/// `debounce_task` and `poll_task`.
///
/// # Examples
///
/// ```rust,ignore
/// use lifeline::{task_methods, Next};
///
/// struct StatusPanel { /* ... */ }
///
/// #[task_methods]
/// impl StatusPanel {
///     /// Addressable as "refresh".
///     #[task]
///     fn refresh(&self) { /* ... */ }
///
///     /// Takes a `Next`, so it is a poll method.
///     #[task]
///     fn check_status(&self, next: Next) { /* ... */ }
///
///     /// Addressable as "save" instead of "persist".
///     #[task(name = "save")]
///     fn persist(&self) { /* ... */ }
///
///     fn not_addressable(&self) {}
/// }
/// ```
///
/// # Method shapes
///
/// - `fn(&self)`: task method
/// - `fn(&self, Next)`: poll method
///
/// Anything else marked `#[task]` (`&mut self`, extra arguments, generics,
/// `async`) is a compile error.
#[proc_macro_attribute]
pub fn task_methods(args: TokenStream, input: TokenStream) -> TokenStream {
    if !args.is_empty() {
        let args = proc_macro2::TokenStream::from(args);
        return syn::Error::new(args.span(), "task_methods takes no arguments")
            .to_compile_error()
            .into();
    }

    let input_impl = syn::parse_macro_input!(input as ItemImpl);
    match expand(input_impl) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

enum Shape {
    Task,
    Poll,
}

struct Entry {
    name: String,
    ident: syn::Ident,
    shape: Shape,
}

fn expand(mut input_impl: ItemImpl) -> syn::Result<proc_macro2::TokenStream> {
    if let Some((_, path, _)) = &input_impl.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "task_methods must be applied to an inherent impl block",
        ));
    }

    let mut entries = Vec::new();
    for item in &mut input_impl.items {
        let ImplItem::Fn(method) = item else { continue };
        if let Some(name) = take_task_attr(method)? {
            let shape = classify(method)?;
            entries.push(Entry { name, ident: method.sig.ident.clone(), shape });
        }
    }

    let mut seen = std::collections::HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.name.as_str()) {
            return Err(syn::Error::new(
                entry.ident.span(),
                format!("duplicate task name `{}`", entry.name),
            ));
        }
    }

    let task_arms = entries.iter().filter(|e| matches!(e.shape, Shape::Task)).map(|e| {
        let (name, ident) = (&e.name, &e.ident);
        quote! { #name => ::core::option::Option::Some(Self::#ident as fn(&Self)), }
    });
    let poll_arms = entries.iter().filter(|e| matches!(e.shape, Shape::Poll)).map(|e| {
        let (name, ident) = (&e.name, &e.ident);
        quote! {
            #name => ::core::option::Option::Some(
                Self::#ident as fn(&Self, ::lifeline::lifeline_runtime::Next),
            ),
        }
    });

    let self_ty = &input_impl.self_ty;
    let (impl_generics, _, where_clause) = input_impl.generics.split_for_impl();

    Ok(quote! {
        #input_impl

        impl #impl_generics ::lifeline::lifeline_runtime::TaskMethods for #self_ty #where_clause {
            fn task_method(name: &str) -> ::core::option::Option<fn(&Self)> {
                match name {
                    #(#task_arms)*
                    _ => ::core::option::Option::None,
                }
            }

            fn poll_method(
                name: &str,
            ) -> ::core::option::Option<fn(&Self, ::lifeline::lifeline_runtime::Next)> {
                match name {
                    #(#poll_arms)*
                    _ => ::core::option::Option::None,
                }
            }
        }
    })
}

/// Strip `#[task]` / `#[task(name = "...")]` from `method`, returning the
/// name it is registered under.
fn take_task_attr(method: &mut ImplItemFn) -> syn::Result<Option<String>> {
    let Some(pos) = method.attrs.iter().position(|a| a.path().is_ident("task")) else {
        return Ok(None);
    };
    let attr = method.attrs.remove(pos);

    let mut name = method.sig.ident.to_string();
    if let Meta::List(_) = &attr.meta {
        let args = attr.parse_args_with(
            syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated,
        )?;
        for arg in args {
            match arg {
                Meta::NameValue(MetaNameValue { path, value, .. }) if path.is_ident("name") => {
                    match value {
                        Expr::Lit(ExprLit { lit: Lit::Str(s), .. }) if !s.value().is_empty() => {
                            name = s.value();
                        }
                        other => {
                            return Err(syn::Error::new(
                                other.span(),
                                "name must be a non-empty string literal",
                            ))
                        }
                    }
                }
                other => {
                    return Err(syn::Error::new(other.span(), "unknown task option; expected `name = \"...\"`"))
                }
            }
        }
    }
    Ok(Some(name))
}

fn classify(method: &ImplItemFn) -> syn::Result<Shape> {
    let sig = &method.sig;
    if let Some(asyncness) = &sig.asyncness {
        return Err(syn::Error::new(asyncness.span(), "task methods cannot be async"));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new(sig.generics.span(), "task methods cannot be generic"));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver)) if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        Some(other) => return Err(syn::Error::new(other.span(), "task methods must take `&self`")),
        None => return Err(syn::Error::new(sig.span(), "task methods must take `&self`")),
    }

    let shape = match inputs.next() {
        None => Shape::Task,
        Some(FnArg::Typed(arg)) if is_next(&arg.ty) => Shape::Poll,
        Some(other) => {
            return Err(syn::Error::new(
                other.span(),
                "a task method takes only `&self`; a poll method takes `&self` and `Next`",
            ))
        }
    };
    if let Some(extra) = inputs.next() {
        return Err(syn::Error::new(extra.span(), "too many arguments for a task method"));
    }
    if let syn::ReturnType::Type(_, ty) = &sig.output {
        if !is_unit(ty) {
            return Err(syn::Error::new(ty.span(), "task methods must return `()`"));
        }
    }
    Ok(shape)
}

fn is_next(ty: &Type) -> bool {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "Next" && segment.arguments.is_none()),
        _ => false,
    }
}

fn is_unit(ty: &Type) -> bool {
    matches!(ty, Type::Tuple(tuple) if tuple.elems.is_empty())
}
