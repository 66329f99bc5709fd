//! Marker macros for the wirekit runtime.
//!
//! Each marker expands to a registrator function submitted into the
//! process-wide inventory; `TypeCatalog::scan` collects them at bootstrap.
//! The marked type stays untouched — the macros only append registration
//! code next to it.

use heck::ToSnakeCase;
use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::{format_ident, quote};
use syn::{
    parse::Parse, parse::ParseStream, parse_macro_input, punctuated::Punctuated, DeriveInput,
    Expr, Ident, Lit, LitStr, Meta, MetaNameValue, Token,
};

const VALID_CATEGORIES: &[&str] = &[
    "text_generation",
    "storage",
    "messaging",
    "tool",
    "memory",
    "queue",
    "evaluation",
    "orchestration",
];

fn category_variant(input: &str) -> Option<&'static str> {
    match input {
        "text_generation" => Some("TextGeneration"),
        "storage" => Some("Storage"),
        "messaging" => Some("Messaging"),
        "tool" => Some("Tool"),
        "memory" => Some("Memory"),
        "queue" => Some("Queue"),
        "evaluation" => Some("Evaluation"),
        "orchestration" => Some("Orchestration"),
        _ => None,
    }
}

fn suggest_categories(input: &str) -> Vec<&'static str> {
    let mut suggestions: Vec<(&str, f64)> = VALID_CATEGORIES
        .iter()
        .map(|&c| (c, strsim::jaro_winkler(input, c)))
        .filter(|(_, score)| *score > 0.6)
        .collect();
    suggestions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    suggestions.into_iter().take(2).map(|(c, _)| c).collect()
}

fn category_error<T: quote::ToTokens>(spanned: &T, input: &str) -> syn::Error {
    let suggestions = suggest_categories(input);
    let message = if suggestions.is_empty() {
        format!(
            "unknown provider category '{input}', expected one of: {}",
            VALID_CATEGORIES.join(", ")
        )
    } else {
        format!(
            "unknown provider category '{input}'\n       = help: did you mean one of: {}?",
            suggestions.join(", ")
        )
    };
    syn::Error::new_spanned(spanned, message)
}

/// Configuration shared by all marker attributes. Each macro validates the
/// subset it accepts.
#[derive(Default)]
struct MarkerConfig {
    name: Option<String>,
    ctor: Option<Expr>,
    category: Option<String>,
    prefix: Option<String>,
    meta: Vec<(String, String)>,
}

impl Parse for MarkerConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = MarkerConfig::default();

        let mut seen_name = false;
        let mut seen_ctor = false;
        let mut seen_category = false;
        let mut seen_prefix = false;
        let mut seen_meta = false;

        let punctuated: Punctuated<Meta, Token![,]> =
            input.parse_terminated(Meta::parse, Token![,])?;

        for meta in punctuated {
            match meta {
                Meta::NameValue(nv) if nv.path.is_ident("name") => {
                    if seen_name {
                        return Err(syn::Error::new_spanned(nv.path, "duplicate `name` parameter"));
                    }
                    seen_name = true;
                    config.name = Some(expect_str_lit(&nv, "name = \"my-name\"")?);
                }
                Meta::NameValue(nv) if nv.path.is_ident("prefix") => {
                    if seen_prefix {
                        return Err(syn::Error::new_spanned(
                            nv.path,
                            "duplicate `prefix` parameter",
                        ));
                    }
                    seen_prefix = true;
                    config.prefix = Some(expect_str_lit(&nv, "prefix = \"/items\"")?);
                }
                Meta::NameValue(nv) if nv.path.is_ident("ctor") => {
                    if seen_ctor {
                        return Err(syn::Error::new_spanned(nv.path, "duplicate `ctor` parameter"));
                    }
                    seen_ctor = true;
                    // Reject string literals with a clear message.
                    match &nv.value {
                        Expr::Lit(syn::ExprLit {
                            lit: Lit::Str(s), ..
                        }) => {
                            return Err(syn::Error::new_spanned(
                                s,
                                "ctor must be a Rust expression, not a string literal. \
                 Use: ctor = MyType::new()  (with parentheses), \
                 or:  ctor = Default::default()",
                            ));
                        }
                        _ => {
                            config.ctor = Some(nv.value.clone());
                        }
                    }
                }
                Meta::NameValue(nv) if nv.path.is_ident("category") => {
                    if seen_category {
                        return Err(syn::Error::new_spanned(
                            nv.path,
                            "duplicate `category` parameter",
                        ));
                    }
                    seen_category = true;
                    match &nv.value {
                        Expr::Path(path) => {
                            let Some(ident) = path.path.get_ident() else {
                                return Err(syn::Error::new_spanned(
                                    path,
                                    "category must be a simple identifier, e.g. category = tool",
                                ));
                            };
                            config.category = Some(ident.to_string());
                        }
                        Expr::Lit(syn::ExprLit {
                            lit: Lit::Str(s), ..
                        }) => {
                            config.category = Some(s.value());
                        }
                        other => {
                            return Err(syn::Error::new_spanned(
                                other,
                                "category must be an identifier or string literal, e.g. category = tool",
                            ));
                        }
                    }
                }
                Meta::List(list) if list.path.is_ident("meta") => {
                    if seen_meta {
                        return Err(syn::Error::new_spanned(
                            list.path,
                            "duplicate `meta(...)` parameter",
                        ));
                    }
                    seen_meta = true;
                    let inner: Punctuated<Meta, Token![,]> =
                        list.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)?;
                    for entry in inner {
                        let Meta::NameValue(nv) = entry else {
                            return Err(syn::Error::new_spanned(
                                entry,
                                "meta entries must be key = \"value\" pairs",
                            ));
                        };
                        let Some(key) = nv.path.get_ident().map(|i| i.to_string()) else {
                            return Err(syn::Error::new_spanned(
                                nv.path,
                                "meta keys must be simple identifiers",
                            ));
                        };
                        let value = expect_str_lit(&nv, "key = \"value\"")?;
                        config.meta.push((key, value));
                    }
                }
                other => {
                    return Err(syn::Error::new_spanned(other, "unknown attribute parameter"));
                }
            }
        }

        Ok(config)
    }
}

fn expect_str_lit(nv: &MetaNameValue, example: &str) -> syn::Result<String> {
    match &nv.value {
        Expr::Lit(syn::ExprLit {
            lit: Lit::Str(s), ..
        }) => Ok(s.value()),
        other => Err(syn::Error::new_spanned(
            other,
            format!("expected a string literal, e.g. {example}"),
        )),
    }
}

enum Marker {
    Component,
    Service,
    Provider,
    HttpHandler,
}

impl Marker {
    fn tag(&self) -> &'static str {
        match self {
            Marker::Component => "component",
            Marker::Service => "service",
            Marker::Provider => "provider",
            Marker::HttpHandler => "http_handler",
        }
    }
}

fn expand_marker(marker: Marker, attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as MarkerConfig);
    let input = parse_macro_input!(item as DeriveInput);

    match try_expand(marker, config, &input) {
        Ok(generated) => {
            let out = quote! {
                #input
                #generated
            };
            out.into()
        }
        Err(error) => {
            // Keep the original item so the type itself still compiles.
            let error = error.to_compile_error();
            let out = quote! {
                #input
                #error
            };
            out.into()
        }
    }
}

fn try_expand(
    marker: Marker,
    config: MarkerConfig,
    input: &DeriveInput,
) -> syn::Result<proc_macro2::TokenStream> {
    let struct_ident = input.ident.clone();

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "marked types cannot be generic: discovery requires a concrete type",
        ));
    }

    // Per-marker parameter validation.
    match marker {
        Marker::Component | Marker::Service => {
            if config.category.is_some() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`category` is only valid on #[provider(...)]",
                ));
            }
            if config.prefix.is_some() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`prefix` is only valid on #[http_handler(...)]",
                ));
            }
            if !config.meta.is_empty() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`meta(...)` is only valid on #[provider(...)]",
                ));
            }
        }
        Marker::Provider => {
            if config.prefix.is_some() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`prefix` is only valid on #[http_handler(...)]",
                ));
            }
            if config.name.is_none() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "provider markers require a name, e.g. #[provider(category = tool, name = \"echo\")]",
                ));
            }
            if config.category.is_none() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "provider markers require a category, e.g. #[provider(category = tool, name = \"echo\")]",
                ));
            }
        }
        Marker::HttpHandler => {
            if config.category.is_some() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`category` is only valid on #[provider(...)]",
                ));
            }
            if !config.meta.is_empty() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`meta(...)` is only valid on #[provider(...)]",
                ));
            }
            if config.name.is_some() {
                return Err(syn::Error::new(
                    Span::call_site(),
                    "`name` is not supported on #[http_handler(...)]",
                ));
            }
        }
    }

    let snake = struct_ident.to_string().to_snake_case();
    let tag = marker.tag();
    let registrator_name = format_ident!("__{snake}_{tag}_registrator");
    let construct_name = format_ident!("__{snake}_{tag}_construct");
    let bind_name = format_ident!("__{snake}_{tag}_bind");

    let marker_tokens = match &marker {
        Marker::Component => quote! { ::wirekit::catalog::MarkerKind::Component },
        Marker::Service => quote! { ::wirekit::catalog::MarkerKind::Service },
        Marker::HttpHandler => quote! { ::wirekit::catalog::MarkerKind::HttpHandler },
        Marker::Provider => {
            let raw = config.category.as_deref().unwrap_or_default();
            let Some(variant) = category_variant(raw) else {
                return Err(category_error(&struct_ident, raw));
            };
            let variant = Ident::new(variant, Span::call_site());
            quote! {
                ::wirekit::catalog::MarkerKind::Provider(
                    ::wirekit::providers::ProviderCategory::#variant
                )
            }
        }
    };

    let name_tokens = match &config.name {
        Some(name) => {
            let lit = LitStr::new(name, Span::call_site());
            quote! { ::core::option::Option::Some(#lit) }
        }
        None => quote! { ::core::option::Option::None },
    };

    let meta_tokens: Vec<_> = config
        .meta
        .iter()
        .map(|(key, value)| {
            let key = LitStr::new(key, Span::call_site());
            let value = LitStr::new(value, Span::call_site());
            quote! { (#key, #value) }
        })
        .collect();

    let prefix_lit = LitStr::new(config.prefix.as_deref().unwrap_or(""), Span::call_site());

    // Constructor strategy: an explicit ctor expression wins, otherwise the
    // type's Injectable impl is the construction path.
    let (ctor_stmt, ctor_assert) = match &config.ctor {
        Some(expr) => (
            quote! { let value: #struct_ident = #expr; },
            quote! {},
        ),
        None => (
            quote! {
                let value =
                    <#struct_ident as ::wirekit::container::Injectable>::construct(container)?;
            },
            quote! {
                const _: () = {
                    #[allow(dead_code)]
                    fn __wirekit_require_injectable_impl()
                    where
                        #struct_ident: ::wirekit::container::Injectable,
                    {}
                };
            },
        ),
    };

    let (bind_tokens, bind_extras) = match marker {
        Marker::HttpHandler => (
            quote! { ::core::option::Option::Some(#bind_name) },
            quote! {
                const _: () = {
                    #[allow(dead_code)]
                    fn __wirekit_require_http_handler_impl()
                    where
                        #struct_ident: ::wirekit::http::HttpHandler,
                    {}
                };

                #[doc(hidden)]
                fn #bind_name(
                    table: &mut ::wirekit::http::RouteTable,
                ) -> ::core::result::Result<(), ::wirekit::http::RouteError> {
                    table.bind::<#struct_ident>(#prefix_lit)
                }
            },
        ),
        _ => (quote! { ::core::option::Option::None }, quote! {}),
    };

    // Provider DX: expose the registration coordinates as consts.
    let provider_consts = match (&marker, &config.name, &config.category) {
        (Marker::Provider, Some(name), Some(category)) => {
            let name_lit = LitStr::new(name, Span::call_site());
            let variant = Ident::new(
                category_variant(category).expect("category validated above"),
                Span::call_site(),
            );
            quote! {
                impl #struct_ident {
                    pub const PROVIDER_CATEGORY: ::wirekit::providers::ProviderCategory =
                        ::wirekit::providers::ProviderCategory::#variant;
                    pub const PROVIDER_NAME: &'static str = #name_lit;
                }
            }
        }
        _ => quote! {},
    };

    Ok(quote! {
        #ctor_assert

        #[doc(hidden)]
        #[allow(unused_variables)]
        fn #construct_name(
            container: &::wirekit::container::Container,
        ) -> ::wirekit::Result<
            ::std::sync::Arc<dyn ::std::any::Any + ::core::marker::Send + ::core::marker::Sync>,
        > {
            #ctor_stmt
            Ok(::std::sync::Arc::new(value))
        }

        #[doc(hidden)]
        fn #registrator_name(b: &mut ::wirekit::catalog::CatalogBuilder) {
            b.submit(::wirekit::catalog::ComponentDescriptor {
                type_id: ::std::any::TypeId::of::<#struct_ident>(),
                type_name: ::std::any::type_name::<#struct_ident>(),
                module_path: ::core::module_path!(),
                marker: #marker_tokens,
                name: #name_tokens,
                metadata: &[#(#meta_tokens),*],
                route_prefix: #prefix_lit,
                construct: ::core::option::Option::Some(#construct_name),
                bind_routes: #bind_tokens,
            });
        }

        ::wirekit::inventory::submit! {
            ::wirekit::catalog::Registrator(#registrator_name)
        }

        #bind_extras

        #provider_consts
    })
}

/// Mark a type as a generic component managed by the container.
///
/// Parameters: `name = "..."` (optional instance name), `ctor = expr`
/// (optional constructor expression; defaults to the type's `Injectable`
/// impl).
#[proc_macro_attribute]
pub fn component(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_marker(Marker::Component, attr, item)
}

/// Mark a type as a service. A service is also a component for discovery
/// purposes; the distinct marker exists for filtering and diagnostics.
#[proc_macro_attribute]
pub fn service(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_marker(Marker::Service, attr, item)
}

/// Mark a type as a provider: `category` and `name` are required; arbitrary
/// `meta(key = "value", ...)` pairs are passed through to the provider
/// registry untouched.
#[proc_macro_attribute]
pub fn provider(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_marker(Marker::Provider, attr, item)
}

/// Mark a type as an HTTP handler. Routes are declared in the type's
/// `HttpHandler::routes` impl under the class-level `prefix`.
#[proc_macro_attribute]
pub fn http_handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    expand_marker(Marker::HttpHandler, attr, item)
}
