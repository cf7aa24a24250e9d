//! Built-in privacy and mobile-hotspot lists.

pub const NULL_BSSID: &str = "000000000000";
pub const WILDCARD_BSSID: &str = "ffffffffffff";

pub const SSID_PREFIXES: &[&str] = &[
    // Mobile devices
    "AndroidAP",
    "AndroidHotspot",
    "Android Hotspot",
    "barnacle",
    "Galaxy Note",
    "Galaxy S",
    "Galaxy Tab",
    "HTC ",
    "iPhone",
    "Lenovo P780_ROW",
    "LG-MS770",
    "LG-MS870",
    "LG VS910 4G",
    "LG Vortex",
    "MB526 ",
    "MIFI",
    "MiFi",
    "myLGNet",
    "myTouch 4G Hotspot",
    "NOKIA Lumia",
    "PhoneAP",
    "SCH-I",
    "Sprint MiFi",
    "Verizon ",
    "Verizon-",
    "VirginMobile MiFi",
    "VodafoneMobileWiFi-",
    "XT320-",
    "FirefoxHotspot",
    "Mobile Hotspot",
    // Buses, trains and planes
    ".DeinBus.de",
    "ac_transit_wifi_bus",
    "ADAC_Postbus",
    "Afifi",
    "AirportExpressZone",
    "AmtrakConnect",
    "Amtrak_",
    "amtrak_",
    "Arcticbus Wifi",
    "arriva",
    "AutoPostale",
    "Barcelona Bus Turistic ",
    "Boreal_Kundenett",
    "Bus4You-",
    "CapitalBus",
    "CarPostal",
    "CDWiFi",
    "CommuteNet",
    "csadplzen_bus",
    "EMT-Madrid",
    "FlixBus",
    "Flybussekspressen",
    "Flybussen",
    "Flygbussarna Free WiFi ",
    "GBUS",
    "GBusWifi",
    "gogoinflight",
    "Hot-Spot-KS",
    "wifi_rail",
    "egged.co.il",
    "gb-tours.com",
    "ISRAEL-RAILWAYS",
    "Kolumbus",
    "KOLUMBUS",
    "Kystbussen_Kundennett",
    "MAVSTART-WiFi",
    "MeinFernbus",
    "Nateev-WiFi",
    "NationalExpress",
    "Norgesbuss",
    "Norwegian Internet Access",
    "NSB_INTERAKTIV",
    "Omni-WiFi",
    "onnibus.com",
    "Oxford Tube",
    "PostAuto",
    "QbuzzWIFI",
    "quickshuttle_",
    "SF Shuttle Wireless",
    "ShuttleWiFi",
    "Southwest WiFi",
    "SST-PR-1",
    "stagecoach-wifi",
    "Telekom_ICE",
    "TPE-Free Bus",
    "THSR-VeeTIME",
    "TriangleTransitWiFi_",
    "VR-junaverkko",
    "WiFi in de trein",
    "WiFi PPLUS",
    "wifi@boreal.no",
    "wifi@nettbuss.no",
    "first-wifi",
];

pub const SSID_SUFFIXES: &[&str] = &[
    "iPhone",
    "iphone",
    "MIFI",
    "MiFi",
    "Mifi",
    "mifi",
    "mi-fi",
    "MyWi",
    "Phone",
    "Portable Hotspot",
    "Tether",
    "tether",
    // opt-out marker
    "_nomap",
];

pub const BSSID_OUIS: &[&str] = &[
    // Apple handsets and tablets
    "001b63", "0021e9", "74e2f5", "78d6f0", "7c6d62", "7cc537", "88c663", "8c7712",
    // Motorola Mobility
    "1430c6", "34bb26", "60beb5", "b07994", "ccc3ea", "e0757d", "f8e079", "f8f1b6",
    // Adelaide Metro
    "a854b2",
];
