//! Japanese UI messages for auth failures.

/// Shown when the backend gave no message at all.
pub const AUTH_FALLBACK_MESSAGE: &str = "認証エラーが発生しました";

/// Map a backend auth message to the text shown to the user.
///
/// Known messages are matched exactly. Anything else is passed through
/// unchanged, and an empty message becomes [`AUTH_FALLBACK_MESSAGE`].
pub fn localize_auth_error(message: &str) -> String {
    let localized = match message {
        "Invalid login credentials" => "メールアドレスまたはパスワードが正しくありません",
        "Email not confirmed" => "メールアドレスが確認されていません",
        "User already registered" => "このメールアドレスは既に登録されています",
        "Password should be at least 6 characters" => "パスワードは6文字以上である必要があります",
        "Unable to validate email address: invalid format" => "無効なメールアドレス形式です",
        "" => AUTH_FALLBACK_MESSAGE,
        other => other,
    };
    localized.to_string()
}
