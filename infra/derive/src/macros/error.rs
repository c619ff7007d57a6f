use fxhash::FxHashSet;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Field, Fields, FieldsNamed, Ident, Type, Variant};

struct VariantMeta<'a> {
    ident: &'a Ident,
    kind: String,
    source: Option<(&'a Ident, &'a Type)>,
    has_context: bool,
    cfg_attrs: Vec<Attribute>,
}

pub fn expand_derive(input: DeriveInput) -> TokenStream {
    let name = &input.ident;
    let trait_name = format_ident!("{}Ext", name);

    let Data::Enum(data) = &input.data else {
        return syn::Error::new_spanned(name, "keystone_error can only be applied to enums")
            .to_compile_error();
    };

    let variants = match data.variants.iter().map(parse_variant).collect::<Result<Vec<_>, _>>() {
        Ok(v) => v,
        Err(err) => return err.to_compile_error(),
    };
    if let Some(err) = missing_context(&variants) {
        return err.to_compile_error();
    }

    let derives = missing_derives(&input);
    let context_impl = expand_context_trait(name, &trait_name, &variants);
    let from_impls = variants.iter().filter_map(|v| expand_from_source(name, &trait_name, v));
    let internal_impls = expand_internal(name, &variants);
    let kind_impl = expand_kind(name, &variants);

    quote! {
        #[allow(non_shorthand_field_patterns)]
        #derives
        #input

        #[allow(dead_code, unreachable_pub)]
        pub type Result<T, E = #name> = std::result::Result<T, E>;

        #kind_impl
        #context_impl
        #(#from_impls)*
        #internal_impls

        #[allow(dead_code)]
        fn format_context(context: &Option<std::borrow::Cow<'static, str>>) -> std::borrow::Cow<'static, str> {
            context.as_ref().map_or(std::borrow::Cow::Borrowed(""), |c| std::borrow::Cow::Owned(format!(" ({c})")))
        }
    }
}

fn parse_variant(v: &Variant) -> Result<VariantMeta<'_>, syn::Error> {
    let Fields::Named(fields) = &v.fields else {
        return Err(syn::Error::new_spanned(
            v,
            "keystone_error requires named fields (`message`, `source`, `context`)",
        ));
    };

    let has_context = context_field(fields)?.is_some();
    let source = source_field(fields).and_then(|f| f.ident.as_ref().map(|ident| (ident, &f.ty)));

    Ok(VariantMeta {
        ident: &v.ident,
        kind: snake_case(&v.ident.to_string()),
        source,
        has_context,
        cfg_attrs: v.attrs.iter().filter(|a| a.path().is_ident("cfg")).cloned().collect(),
    })
}

fn context_field(fields: &FieldsNamed) -> Result<Option<&Field>, syn::Error> {
    let Some(field) = fields.named.iter().find(|f| f.ident.as_ref().is_some_and(|i| i == "context"))
    else {
        return Ok(None);
    };
    if is_context_type(&field.ty) {
        Ok(Some(field))
    } else {
        Err(syn::Error::new_spanned(&field.ty, "context field must be Option<Cow<'static, str>>"))
    }
}

fn source_field(fields: &FieldsNamed) -> Option<&Field> {
    fields.named.iter().find(|field| {
        field.ident.as_ref().is_some_and(|ident| ident == "source")
            || field.attrs.iter().any(|a| a.path().is_ident("source") || a.path().is_ident("from"))
    })
}

fn missing_context(variants: &[VariantMeta<'_>]) -> Option<syn::Error> {
    variants.iter().find(|v| v.source.is_some() && !v.has_context).map(|v| {
        syn::Error::new_spanned(
            v.ident,
            "keystone_error requires `context: Option<Cow<'static, str>>` for variants with a source",
        )
    })
}

fn missing_derives(input: &DeriveInput) -> TokenStream {
    let mut present = FxHashSet::default();
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("derive")) {
        let _ = attr.parse_nested_meta(|meta| {
            if let Some(seg) = meta.path.segments.last() {
                present.insert(seg.ident.to_string());
            }
            Ok(())
        });
    }

    let mut tokens = Vec::new();
    if !present.contains("Debug") {
        tokens.push(quote! { Debug });
    }
    if !present.contains("Error") {
        tokens.push(quote! { ::thiserror::Error });
    }
    if tokens.is_empty() { quote! {} } else { quote! { #[derive(#(#tokens),*)] } }
}

fn expand_kind(name: &Ident, variants: &[VariantMeta<'_>]) -> TokenStream {
    let arms = variants.iter().map(|v| {
        let cfg_attrs = &v.cfg_attrs;
        let ident = v.ident;
        let kind = &v.kind;
        quote! { #(#cfg_attrs)* Self::#ident { .. } => #kind, }
    });

    quote! {
        #[automatically_derived]
        impl #name {
            /// Stable snake-case name of the variant, for logs and metrics labels.
            #[must_use]
            pub const fn kind(&self) -> &'static str {
                match self {
                    #(#arms)*
                }
            }
        }
    }
}

fn expand_context_trait(
    name: &Ident,
    trait_name: &Ident,
    variants: &[VariantMeta<'_>],
) -> TokenStream {
    let arms = variants.iter().filter(|v| v.has_context).map(|v| {
        let cfg_attrs = &v.cfg_attrs;
        let ident = v.ident;
        quote! { #(#cfg_attrs)* #name::#ident { context: c, .. } => *c = Some(context.into()), }
    });

    quote! {
        pub trait #trait_name<T> {
            fn context(self, context: impl Into<std::borrow::Cow<'static, str>>) -> std::result::Result<T, #name>;
        }

        #[automatically_derived]
        impl<T> #trait_name<T> for std::result::Result<T, #name> {
            #[inline]
            fn context(self, context: impl Into<std::borrow::Cow<'static, str>>) -> Self {
                self.map_err(|mut e| {
                    match &mut e {
                        #(#arms)*
                        _ => {}
                    }
                    e
                })
            }
        }
    }
}

fn expand_from_source(
    name: &Ident,
    trait_name: &Ident,
    v: &VariantMeta<'_>,
) -> Option<TokenStream> {
    if v.ident == "Internal" {
        return None;
    }
    let (field, ty) = v.source?;
    let ident = v.ident;
    let cfg_attrs = &v.cfg_attrs;

    Some(quote! {
        #(#cfg_attrs)*
        #[automatically_derived]
        impl From<#ty> for #name {
            #[inline]
            fn from(#field: #ty) -> Self { Self::#ident { #field, context: None } }
        }

        #(#cfg_attrs)*
        impl<T> #trait_name<T> for std::result::Result<T, #ty> {
            #[inline]
            fn context(self, context: impl Into<std::borrow::Cow<'static, str>>) -> std::result::Result<T, #name> {
                self.map_err(|#field| #name::#ident { #field, context: Some(context.into()) })
            }
        }
    })
}

fn expand_internal(name: &Ident, variants: &[VariantMeta<'_>]) -> TokenStream {
    let Some(internal) = variants.iter().find(|v| v.ident == "Internal") else {
        return quote!();
    };
    let cfg_attrs = &internal.cfg_attrs;

    quote! {
        #(#cfg_attrs)*
        impl From<&'static str> for #name {
            #[inline]
            fn from(s: &'static str) -> Self { Self::Internal { message: std::borrow::Cow::Borrowed(s), context: None } }
        }
        #(#cfg_attrs)*
        impl From<String> for #name {
            #[inline]
            fn from(s: String) -> Self { Self::Internal { message: std::borrow::Cow::Owned(s), context: None } }
        }
    }
}

fn snake_case(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    for (i, ch) in ident.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Matches `Option<Cow<'static, str>>` by its trailing path segments.
fn is_context_type(ty: &Type) -> bool {
    fn last_segment(ty: &Type) -> Option<&syn::PathSegment> {
        let Type::Path(path) = ty else { return None };
        path.path.segments.last()
    }
    fn generic_args(seg: &syn::PathSegment) -> Option<(Option<&syn::GenericArgument>, Option<&syn::GenericArgument>)> {
        let syn::PathArguments::AngleBracketed(args) = &seg.arguments else { return None };
        let mut iter = args.args.iter();
        Some((iter.next(), iter.next()))
    }

    let Some(option) = last_segment(ty).filter(|s| s.ident == "Option") else { return false };
    let Some((Some(syn::GenericArgument::Type(inner)), None)) = generic_args(option) else {
        return false;
    };
    let Some(cow) = last_segment(inner).filter(|s| s.ident == "Cow") else { return false };
    let Some((Some(syn::GenericArgument::Lifetime(lt)), Some(syn::GenericArgument::Type(target)))) =
        generic_args(cow)
    else {
        return false;
    };
    lt.ident == "static" && last_segment(target).is_some_and(|s| s.ident == "str")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_splits_words() {
        assert_eq!(snake_case("KeyNotFound"), "key_not_found");
        assert_eq!(snake_case("Integrity"), "integrity");
        assert_eq!(snake_case("KeyStoreIo"), "key_store_io");
    }

    #[test]
    fn context_type_is_recognized() {
        let ok: Type = syn::parse_quote!(Option<Cow<'static, str>>);
        let qualified: Type = syn::parse_quote!(Option<std::borrow::Cow<'static, str>>);
        let wrong_lifetime: Type = syn::parse_quote!(Option<Cow<'a, str>>);
        let wrong_inner: Type = syn::parse_quote!(Option<String>);

        assert!(is_context_type(&ok));
        assert!(is_context_type(&qualified));
        assert!(!is_context_type(&wrong_lifetime));
        assert!(!is_context_type(&wrong_inner));
    }

    #[test]
    fn expansion_emits_kind_and_ext_trait() {
        let input: DeriveInput = syn::parse_quote! {
            pub enum DemoError {
                #[error("io{}: {source}", format_context(.context))]
                Io { source: std::io::Error, context: Option<Cow<'static, str>> },
            }
        };
        let out = expand_derive(input).to_string();

        assert!(out.contains("DemoErrorExt"));
        assert!(out.contains("\"io\""));
        assert!(!out.contains("compile_error"));
    }

    #[test]
    fn source_without_context_is_rejected() {
        let input: DeriveInput = syn::parse_quote! {
            pub enum DemoError {
                Io { source: std::io::Error },
            }
        };
        assert!(expand_derive(input).to_string().contains("compile_error"));
    }
}
