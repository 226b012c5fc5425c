//! Transformer-related macros.
//!
//! This module contains:
//! - `#[converter]` - a pure type conversion (`CONVERTER` capability)
//! - `#[transformer]` - any other payload transformation
//!
//! Both expand a function `fn(&T, &str) -> Result<U, E>` (the `&str`
//! encoding argument is optional) into a unit struct implementing
//! `estuary::Transformer`. `T` becomes the accepted source type and `U` the
//! return type.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    FnArg, GenericArgument, Ident, ItemFn, LitBool, LitStr, PathArguments, ReturnType, Token, Type,
    parse::Parse, parse_macro_input,
};

/// Which attribute is being expanded.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Converter,
    Transformer,
}

impl Kind {
    fn attribute(self) -> &'static str {
        match self {
            Kind::Converter => "converter",
            Kind::Transformer => "transformer",
        }
    }
}

/// Arguments shared by `#[converter]` and `#[transformer]`.
#[derive(Default)]
pub(crate) struct TransformerArgs {
    pub name: Option<String>,
    pub mime: Option<String>,
    pub encoding: Option<String>,
    pub ignore_bad_input: bool,
    pub accept_null: bool,
}

impl Parse for TransformerArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut args = TransformerArgs::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "name" => {
                    let lit: LitStr = input.parse()?;
                    args.name = Some(lit.value());
                }
                "mime" => {
                    let lit: LitStr = input.parse()?;
                    args.mime = Some(lit.value());
                }
                "encoding" => {
                    let lit: LitStr = input.parse()?;
                    args.encoding = Some(lit.value());
                }
                "ignore_bad_input" => {
                    let lit: LitBool = input.parse()?;
                    args.ignore_bad_input = lit.value;
                }
                "accept_null" => {
                    let lit: LitBool = input.parse()?;
                    args.accept_null = lit.value;
                }
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", other),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(args)
    }
}

/// `U` out of `Result<U, E>`.
fn result_ok_type(output: &ReturnType) -> Option<&Type> {
    let ReturnType::Type(_, ty) = output else {
        return None;
    };
    let Type::Path(path) = &**ty else {
        return None;
    };
    let last = path.path.segments.last()?;
    if last.ident != "Result" {
        return None;
    }
    let PathArguments::AngleBracketed(generics) = &last.arguments else {
        return None;
    };
    match generics.args.first()? {
        GenericArgument::Type(ty) => Some(ty),
        _ => None,
    }
}

/// Implementation of `#[converter]` and `#[transformer]`.
pub(crate) fn transformer_impl(attr: TokenStream, item: TokenStream, kind: Kind) -> TokenStream {
    let args = parse_macro_input!(attr as TransformerArgs);
    let input = parse_macro_input!(item as ItemFn);
    let attribute = kind.attribute();

    let fn_name = &input.sig.ident;
    let fn_vis = &input.vis;
    let fn_inputs = &input.sig.inputs;
    let fn_output = &input.sig.output;
    let fn_block = &input.block;

    if let Some(asyncness) = &input.sig.asyncness {
        return syn::Error::new_spanned(asyncness, format!("#[{attribute}] function must not be async"))
            .to_compile_error()
            .into();
    }

    let source_type = match fn_inputs.first() {
        Some(FnArg::Typed(pat_type)) => {
            if let Type::Reference(type_ref) = &*pat_type.ty {
                &type_ref.elem
            } else {
                return syn::Error::new_spanned(
                    &pat_type.ty,
                    format!("#[{attribute}] payload argument must be a reference (&T)"),
                )
                .to_compile_error()
                .into();
            }
        }
        _ => {
            return syn::Error::new_spanned(
                fn_inputs,
                format!("#[{attribute}] function must take the payload: fn(payload: &T, encoding: &str)"),
            )
            .to_compile_error()
            .into();
        }
    };

    let takes_encoding = match fn_inputs.len() {
        1 => false,
        2 => true,
        _ => {
            return syn::Error::new_spanned(
                fn_inputs,
                format!("#[{attribute}] function takes the payload and optionally the encoding"),
            )
            .to_compile_error()
            .into();
        }
    };

    let Some(return_type) = result_ok_type(fn_output) else {
        return syn::Error::new_spanned(
            &input.sig,
            format!("#[{attribute}] function must return Result<U, E>"),
        )
        .to_compile_error()
        .into();
    };

    let name = args.name.unwrap_or_else(|| fn_name.to_string());

    let mut return_data_type = quote! { ::estuary::DataType::of::<#return_type>() };
    if let Some(mime) = &args.mime {
        return_data_type = quote! { #return_data_type.with_mime_type(#mime) };
    }
    if let Some(encoding) = &args.encoding {
        return_data_type = quote! { #return_data_type.with_encoding(#encoding) };
    }

    let mut capabilities = Vec::new();
    if kind == Kind::Converter {
        capabilities.push(quote! { ::estuary::Capabilities::CONVERTER });
    }
    if args.ignore_bad_input {
        capabilities.push(quote! { ::estuary::Capabilities::IGNORE_BAD_INPUT });
    }
    if args.accept_null {
        capabilities.push(quote! { ::estuary::Capabilities::ACCEPT_NULL });
    }
    let capabilities = if capabilities.is_empty() {
        quote! { ::estuary::Capabilities::empty() }
    } else {
        quote! { #(#capabilities)|* }
    };

    let call = if takes_encoding {
        quote! { Self::apply(__payload, __request.encoding()) }
    } else {
        quote! { Self::apply(__payload) }
    };

    let expanded = quote! {
        #[allow(non_camel_case_types)]
        #[derive(Clone, Copy, Debug, Default)]
        #[doc = concat!("Transformer generated by `#[estuary::", #attribute, "]` on `", stringify!(#fn_name), "`")]
        #fn_vis struct #fn_name;

        impl #fn_name {
            fn apply(#fn_inputs) #fn_output #fn_block
        }

        impl ::estuary::Transformer for #fn_name {
            fn name(&self) -> &str {
                #name
            }

            fn source_data_types(&self) -> &[::estuary::DataType] {
                static SOURCES: ::std::sync::OnceLock<[::estuary::DataType; 1]> =
                    ::std::sync::OnceLock::new();
                SOURCES.get_or_init(|| [::estuary::DataType::of::<#source_type>()])
            }

            fn return_data_type(&self) -> &::estuary::DataType {
                static RETURNS: ::std::sync::OnceLock<::estuary::DataType> =
                    ::std::sync::OnceLock::new();
                RETURNS.get_or_init(|| #return_data_type)
            }

            fn capabilities(&self) -> ::estuary::Capabilities {
                #capabilities
            }

            fn transform(
                &self,
                __request: &::estuary::TransformRequest<'_>,
            ) -> ::core::result::Result<::estuary::Transformed, ::estuary::TransformerError> {
                let ::core::option::Option::Some(__payload) = __request.payload_ref::<#source_type>() else {
                    return ::core::result::Result::Err(::estuary::TransformerError::CannotApply {
                        transformer: #name.to_owned(),
                        payload_type: __request.payload().type_ref().name().to_owned(),
                    });
                };
                match #call {
                    ::core::result::Result::Ok(__value) => ::core::result::Result::Ok(
                        ::estuary::Transformed::Value(::estuary::Payload::new(__value)),
                    ),
                    ::core::result::Result::Err(__error) => {
                        ::core::result::Result::Err(::estuary::TransformerError::Failed {
                            transformer: #name.to_owned(),
                            cause: ::core::convert::Into::into(__error),
                        })
                    }
                }
            }
        }
    };

    TokenStream::from(expanded)
}
