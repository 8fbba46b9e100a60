//! Anti-fingerprinting: user-agent rotation and pre-navigation patches.
//!
//! Headless Chrome leaks automation signals (navigator.webdriver, an empty
//! plugin list, SwiftShader as the WebGL renderer). The patch script runs
//! before any page script and normalizes those back to what a desktop
//! browser reports.

use rand::Rng;

/// A user agent plus the client-hint fields that must stay consistent with
/// it. Mixing a Mac UA with a Windows platform hint is itself a signal.
#[derive(Debug, Clone, Copy)]
pub struct UserAgentProfile {
    pub user_agent: &'static str,
    pub platform: &'static str,
    pub accept_language: &'static str,
    /// navigator.languages, matching Accept-Language.
    pub languages_js: &'static str,
}

/// Current desktop browser user agents (updated Mar 2025).
pub const USER_AGENT_PROFILES: &[UserAgentProfile] = &[
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
        platform: "Windows",
        accept_language: "en-GB,en;q=0.9",
        languages_js: "['en-GB', 'en']",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
        platform: "Windows",
        accept_language: "en-GB,en;q=0.9",
        languages_js: "['en-GB', 'en']",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
        platform: "macOS",
        accept_language: "en-GB,en;q=0.9",
        languages_js: "['en-GB', 'en']",
    },
    UserAgentProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Safari/537.36",
        platform: "Linux",
        accept_language: "en-GB,en;q=0.9",
        languages_js: "['en-GB', 'en']",
    },
];

/// Pick a random profile for a new session.
pub fn random_profile() -> UserAgentProfile {
    let idx = rand::rng().random_range(0..USER_AGENT_PROFILES.len());
    USER_AGENT_PROFILES[idx]
}

/// Build the pre-navigation patch script for a profile. Injected with
/// `Page.addScriptToEvaluateOnNewDocument` so it runs before any page
/// script on every navigation.
pub fn stealth_script(profile: &UserAgentProfile) -> String {
    format!(
        r#"
// Automation flag: headless Chrome reports true.
Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined, configurable: true }});

// Headless Chrome ships no plugins; a real desktop browser always has some.
Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5], configurable: true }});

// Keep navigator.languages consistent with the Accept-Language header.
Object.defineProperty(navigator, 'languages', {{ get: () => {languages}, configurable: true }});

// Extension namespace: absent under automation, stubbed in real Chrome.
if (!window.chrome) {{
    window.chrome = {{}};
}}
if (!window.chrome.runtime) {{
    window.chrome.runtime = {{
        connect: function() {{ return {{ onDisconnect: {{ addListener: function() {{}} }}, postMessage: function() {{}} }}; }},
        sendMessage: function() {{}},
        onMessage: {{ addListener: function() {{}}, removeListener: function() {{}} }},
    }};
}}

// Automation answers 'denied' for notifications without prompting.
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {{
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications'
            ? Promise.resolve({{ state: Notification.permission }})
            : originalQuery(parameters)
    );
}}

// Headless renders through SwiftShader; report a common integrated GPU.
const getParameter = WebGLRenderingContext.prototype.getParameter;
WebGLRenderingContext.prototype.getParameter = function(parameter) {{
    if (parameter === 37445) return 'Intel Inc.';
    if (parameter === 37446) return 'Intel Iris OpenGL Engine';
    return getParameter.apply(this, arguments);
}};
if (typeof WebGL2RenderingContext !== 'undefined') {{
    const getParameter2 = WebGL2RenderingContext.prototype.getParameter;
    WebGL2RenderingContext.prototype.getParameter = function(parameter) {{
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter2.apply(this, arguments);
    }};
}}
"#,
        languages = profile.languages_js,
    )
}
