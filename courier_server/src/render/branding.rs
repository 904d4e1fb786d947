use courier_core::TenantBranding;

/// Embed a rendered email body in the tenant-branded HTML shell.
///
/// The shell uses the tenant's name, logo and colors; callers pass the
/// fallback branding when the identity service has none for the tenant.
pub fn wrap_email_body(body_html: &str, branding: &TenantBranding) -> String {
  let logo = branding
    .logo_url
    .as_deref()
    .map(|url| {
      format!(
        r#"<img src="{}" alt="{}" style="max-height:48px;margin-bottom:16px;" />"#,
        url, branding.name
      )
    })
    .unwrap_or_default();

  format!(
    r#"<html>
<body style="margin:0;padding:0;background:#f4f4f5;font-family:Helvetica,Arial,sans-serif;">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0">
    <tr><td align="center" style="padding:24px;">
      <table role="presentation" width="600" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;overflow:hidden;">
        <tr><td style="background:{primary};padding:20px 32px;">
          {logo}
          <h1 style="margin:0;color:#ffffff;font-size:20px;">{name}</h1>
        </td></tr>
        <tr><td style="padding:32px;color:#1f2937;font-size:15px;line-height:1.6;">
          {body}
        </td></tr>
        <tr><td style="background:{secondary};padding:16px 32px;color:#ffffff;font-size:12px;">
          Sent by {name}
        </td></tr>
      </table>
    </td></tr>
  </table>
</body>
</html>"#,
    primary = branding.primary_color,
    secondary = branding.secondary_color,
    logo = logo,
    name = branding.name,
    body = body_html,
  )
}
