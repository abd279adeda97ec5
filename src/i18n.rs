// ==========================================
// 国际化 (rust-i18n)
// ==========================================
// 错误信封的 message 按当前语言渲染；code 与 details 不随语言变化
// 翻译文件: locales/zh-CN.yml（默认）, locales/en.yml
// ==========================================

/// 支持的语言
pub const SUPPORTED_LOCALES: [&str; 2] = ["zh-CN", "en"];

pub fn current_locale() -> String {
    rust_i18n::locale().to_string()
}

/// 切换语言；不支持的语言保持当前设置并返回 false
pub fn set_locale(locale: &str) -> bool {
    match SUPPORTED_LOCALES.iter().find(|l| l.eq_ignore_ascii_case(locale)) {
        Some(supported) => {
            rust_i18n::set_locale(supported);
            true
        }
        None => {
            tracing::warn!(locale, "不支持的语言，保持 {}", current_locale());
            false
        }
    }
}

pub fn t(key: &str) -> String {
    rust_i18n::t!(key).to_string()
}

/// 翻译并替换 `%{name}` 占位符
///
/// ```no_run
/// use student_lifecycle::i18n::t_with_args;
/// let msg = t_with_args("error.not_found", &[("detail", "S1")]);
/// ```
pub fn t_with_args(key: &str, args: &[(&str, &str)]) -> String {
    args.iter().fold(t(key), |text, (name, value)| {
        text.replace(&format!("%{{{}}}", name), value)
    })
}
